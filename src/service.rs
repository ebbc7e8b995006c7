//! Tenant lifecycle: provisioning, plan changes, suspension, custom domains, trial expiry.
//!
//! Every write is load, recompute, persist against the loaded `version`. A
//! concurrent writer makes the store reject ours with
//! `ConcurrentUpdateConflict`, which is returned to the caller untouched.

use crate::config::TenancyConfig;
use crate::error::{ResolveError, TenancyError};
use crate::model::{Subscription, SubscriptionStatus, Tenant, TenantSettings, TenantStatus};
use crate::policy::{Feature, Plan};
use crate::store::TenantStore;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

fn slug_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").ok())
        .as_ref()
}

fn domain_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)+$").ok()
        })
        .as_ref()
}

pub fn validate_slug(slug: &str) -> Result<(), TenancyError> {
    if slug_pattern().map(|re| re.is_match(slug)).unwrap_or(false) {
        Ok(())
    } else {
        Err(TenancyError::Validation(format!("invalid slug {:?}", slug)))
    }
}

pub struct TenantService<S> {
    store: S,
    base_domain: String,
    trial_period: Duration,
    billing_period: Duration,
}

impl<S: TenantStore> TenantService<S> {
    pub fn new(store: S, config: &TenancyConfig) -> Self {
        TenantService {
            store,
            base_domain: config.base_domain.trim_end_matches('.').to_lowercase(),
            trial_period: Duration::days(config.trial_days),
            billing_period: Duration::days(config.billing_period_days),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn create_tenant(&self, name: &str, slug: &str) -> Result<Tenant, TenancyError> {
        self.create_tenant_at(name, slug, Utc::now()).await
    }

    /// New tenant on the trial plan with its window starting at `now`.
    pub async fn create_tenant_at(&self, name: &str, slug: &str, now: DateTime<Utc>) -> Result<Tenant, TenancyError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TenancyError::Validation("name must not be empty".into()));
        }
        validate_slug(slug)?;
        let trial_ends_at = now + self.trial_period;
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            domain: None,
            status: TenantStatus::Trial,
            settings: TenantSettings::default(),
            subscription: Subscription {
                plan: Plan::Trial,
                status: SubscriptionStatus::Active,
                current_period_start: now,
                current_period_end: trial_ends_at,
                external_billing_ref: None,
            },
            trial_ends_at: Some(trial_ends_at),
            suspended_at: None,
            suspend_reason: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 0,
        };
        tenant.check_invariants()?;
        let created = self.store.create(&tenant).await?;
        tracing::info!(tenant_id = %created.id, slug = %created.slug, trial_ends_at = %trial_ends_at, "tenant created");
        Ok(created)
    }

    /// Re-apply `plan`'s policy and start a fresh billing period.
    /// Trial is not a target; suspended tenants must be reactivated first.
    pub async fn change_plan(&self, id: Uuid, plan: Plan) -> Result<Tenant, TenancyError> {
        if plan == Plan::Trial {
            return Err(TenancyError::Validation("cannot change plan back to trial".into()));
        }
        let mut tenant = self.load(id).await?;
        if tenant.status == TenantStatus::Suspended {
            return Err(TenancyError::Validation("tenant is suspended; reactivate before changing plan".into()));
        }
        let now = Utc::now();
        let from = tenant.subscription.plan;
        plan.policy().apply_to(&mut tenant.settings);
        tenant.subscription.plan = plan;
        tenant.subscription.status = SubscriptionStatus::Active;
        tenant.subscription.current_period_start = now;
        tenant.subscription.current_period_end = now + self.billing_period;
        tenant.status = TenantStatus::Active;
        tenant.trial_ends_at = None;
        if !tenant.settings.has_feature(Feature::CustomDomain) && tenant.domain.take().is_some() {
            tracing::info!(tenant_id = %id, "custom domain dropped with plan change");
        }
        let saved = self.persist(&tenant).await?;
        tracing::info!(tenant_id = %id, from = from.as_str(), to = plan.as_str(), "plan changed");
        Ok(saved)
    }

    pub async fn suspend(&self, id: Uuid, reason: &str) -> Result<Tenant, TenancyError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(TenancyError::Validation("suspend reason must not be empty".into()));
        }
        let mut tenant = self.load(id).await?;
        tenant.status = TenantStatus::Suspended;
        tenant.suspended_at = Some(Utc::now());
        tenant.suspend_reason = Some(reason.to_string());
        let saved = self.persist(&tenant).await?;
        tracing::warn!(tenant_id = %id, reason = %reason, "tenant suspended");
        Ok(saved)
    }

    /// Lift a suspension. Reactivated tenants are `active`, whatever they were before.
    pub async fn reactivate(&self, id: Uuid) -> Result<Tenant, TenancyError> {
        let mut tenant = self.load(id).await?;
        if tenant.status != TenantStatus::Suspended {
            return Err(TenancyError::Validation("tenant is not suspended".into()));
        }
        tenant.status = TenantStatus::Active;
        tenant.suspended_at = None;
        tenant.suspend_reason = None;
        tenant.trial_ends_at = None;
        let saved = self.persist(&tenant).await?;
        tracing::info!(tenant_id = %id, "tenant reactivated");
        Ok(saved)
    }

    pub async fn delete_tenant(&self, id: Uuid) -> Result<(), TenancyError> {
        if self.store.soft_delete(id).await? {
            tracing::info!(tenant_id = %id, "tenant soft-deleted");
            Ok(())
        } else {
            Err(ResolveError::NotFound.into())
        }
    }

    /// Set or clear (`None`) the custom domain. Requires the `custom_domain` feature to set one.
    pub async fn set_custom_domain(&self, id: Uuid, domain: Option<&str>) -> Result<Tenant, TenancyError> {
        let domain = domain.map(|d| self.normalize_domain(d)).transpose()?;
        let mut tenant = self.load(id).await?;
        if domain.is_some() && !tenant.settings.has_feature(Feature::CustomDomain) {
            return Err(TenancyError::FeatureNotAvailable(Feature::CustomDomain));
        }
        tenant.domain = domain;
        let saved = self.persist(&tenant).await?;
        tracing::info!(tenant_id = %id, domain = ?saved.domain, "custom domain updated");
        Ok(saved)
    }

    /// Move trials whose window closed by `now` to `inactive`. Conflicting
    /// tenants are skipped and picked up by the next run. Returns the ids moved.
    pub async fn expire_trials(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, TenancyError> {
        let lapsed = self.store.list_expired_trials(now).await?;
        let mut expired = Vec::with_capacity(lapsed.len());
        for mut tenant in lapsed {
            tenant.status = TenantStatus::Inactive;
            match self.persist(&tenant).await {
                Ok(saved) => expired.push(saved.id),
                Err(TenancyError::ConcurrentUpdateConflict { tenant_id }) => {
                    tracing::warn!(tenant_id = %tenant_id, "trial expiry lost a race; retrying next run");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(count = expired.len(), "expired trials");
        Ok(expired)
    }

    async fn load(&self, id: Uuid) -> Result<Tenant, TenancyError> {
        self.store
            .get_by_id_fresh(id)
            .await?
            .ok_or(TenancyError::Resolve(ResolveError::NotFound))
    }

    async fn persist(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        tenant.check_invariants()?;
        self.store.update(tenant).await.map_err(|e| {
            if e.is_retryable() {
                tracing::info!(tenant_id = %tenant.id, version = tenant.version, "tenant write lost optimistic check");
            }
            e
        })
    }

    fn normalize_domain(&self, raw: &str) -> Result<String, TenancyError> {
        let domain = raw.trim().trim_end_matches('.').to_lowercase();
        let valid = domain.len() <= 253 && domain_pattern().map(|re| re.is_match(&domain)).unwrap_or(false);
        if !valid {
            return Err(TenancyError::Validation(format!("invalid domain {:?}", raw)));
        }
        if domain == self.base_domain || domain.ends_with(&format!(".{}", self.base_domain)) {
            return Err(TenancyError::Validation(format!(
                "custom domain may not be under the platform domain {}",
                self.base_domain
            )));
        }
        Ok(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CachingTenantStore, MemoryTenantStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    fn service() -> TenantService<Arc<MemoryTenantStore>> {
        let config = TenancyConfig {
            base_domain: "example.com".into(),
            ..TenancyConfig::default()
        };
        TenantService::new(Arc::new(MemoryTenantStore::new()), &config)
    }

    #[tokio::test]
    async fn create_stamps_trial() {
        let svc = service();
        let now = Utc::now();
        let t = svc.create_tenant_at("Acme", "acme", now).await.unwrap();
        assert_eq!(t.status, TenantStatus::Trial);
        assert_eq!(t.trial_ends_at, Some(now + Duration::days(14)));
        assert_eq!(t.settings, TenantSettings::default());
        assert_eq!(t.version, 1);
    }

    #[tokio::test]
    async fn create_rejects_taken_or_malformed_slug() {
        let svc = service();
        svc.create_tenant("Acme", "acme").await.unwrap();
        assert!(matches!(svc.create_tenant("Other", "acme").await, Err(TenancyError::DuplicateSlug(s)) if s == "acme"));
        assert!(matches!(svc.create_tenant("Other", "-acme").await, Err(TenancyError::Validation(_))));
        assert!(matches!(svc.create_tenant("Other", "Acme").await, Err(TenancyError::Validation(_))));
        assert!(matches!(svc.create_tenant("  ", "fine").await, Err(TenancyError::Validation(_))));
    }

    #[tokio::test]
    async fn change_plan_is_idempotent_on_settings() {
        let svc = service();
        let t = svc.create_tenant("Acme", "acme").await.unwrap();
        let once = svc.change_plan(t.id, Plan::Professional).await.unwrap();
        let twice = svc.change_plan(t.id, Plan::Professional).await.unwrap();
        assert_eq!(once.settings, twice.settings);
        assert_eq!(twice.status, TenantStatus::Active);
        assert_eq!(twice.trial_ends_at, None);
        assert_eq!(twice.version, once.version + 1);
    }

    #[tokio::test]
    async fn change_plan_rejects_trial_and_suspended() {
        let svc = service();
        let t = svc.create_tenant("Acme", "acme").await.unwrap();
        assert!(matches!(svc.change_plan(t.id, Plan::Trial).await, Err(TenancyError::Validation(_))));
        svc.suspend(t.id, "chargeback").await.unwrap();
        assert!(matches!(svc.change_plan(t.id, Plan::Starter).await, Err(TenancyError::Validation(_))));
        let missing = svc.change_plan(Uuid::new_v4(), Plan::Starter).await.unwrap_err();
        assert!(matches!(missing, TenancyError::Resolve(ResolveError::NotFound)));
    }

    #[tokio::test]
    async fn suspend_and_reactivate() {
        let svc = service();
        let t = svc.create_tenant("Acme", "acme").await.unwrap();
        assert!(matches!(svc.suspend(t.id, " ").await, Err(TenancyError::Validation(_))));
        let s = svc.suspend(t.id, "fraud review").await.unwrap();
        assert_eq!(s.status, TenantStatus::Suspended);
        assert_eq!(s.suspend_reason.as_deref(), Some("fraud review"));
        let r = svc.reactivate(t.id).await.unwrap();
        assert_eq!(r.status, TenantStatus::Active);
        assert!(r.suspended_at.is_none() && r.suspend_reason.is_none());
        assert!(matches!(svc.reactivate(t.id).await, Err(TenancyError::Validation(_))));
    }

    #[tokio::test]
    async fn custom_domain_needs_the_feature() {
        let svc = service();
        let t = svc.create_tenant("Acme", "acme").await.unwrap();
        let err = svc.set_custom_domain(t.id, Some("shop.acme.com")).await.unwrap_err();
        assert!(matches!(err, TenancyError::FeatureNotAvailable(Feature::CustomDomain)));

        svc.change_plan(t.id, Plan::Professional).await.unwrap();
        let saved = svc.set_custom_domain(t.id, Some("Shop.Acme.com.")).await.unwrap();
        assert_eq!(saved.domain.as_deref(), Some("shop.acme.com"));
        assert!(matches!(
            svc.set_custom_domain(t.id, Some("globex.example.com")).await,
            Err(TenancyError::Validation(_))
        ));

        let downgraded = svc.change_plan(t.id, Plan::Starter).await.unwrap();
        assert_eq!(downgraded.domain, None);
    }

    #[tokio::test]
    async fn expire_trials_moves_lapsed_only() {
        let svc = service();
        let past = Utc::now() - Duration::days(30);
        let old = svc.create_tenant_at("Old", "old", past).await.unwrap();
        let fresh = svc.create_tenant("Fresh", "fresh").await.unwrap();
        let moved = svc.expire_trials(Utc::now()).await.unwrap();
        assert_eq!(moved, vec![old.id]);
        let old = svc.store().get_by_id(old.id).await.unwrap().unwrap();
        assert_eq!(old.status, TenantStatus::Inactive);
        let fresh = svc.store().get_by_id(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.status, TenantStatus::Trial);
    }

    #[tokio::test]
    async fn delete_is_soft_and_single_shot() {
        let svc = service();
        let t = svc.create_tenant("Acme", "acme").await.unwrap();
        svc.delete_tenant(t.id).await.unwrap();
        assert!(svc.store().get_by_id(t.id).await.unwrap().is_none());
        assert!(matches!(svc.delete_tenant(t.id).await, Err(TenancyError::Resolve(ResolveError::NotFound))));
        // Slug is free again once the holder is deleted.
        svc.create_tenant("Acme again", "acme").await.unwrap();
    }

    /// Holds every `get_by_id` until two callers have loaded, so both writes race on the same version.
    struct Lockstep {
        inner: MemoryTenantStore,
        barrier: Barrier,
    }

    #[async_trait]
    impl TenantStore for Lockstep {
        async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError> {
            let found = self.inner.get_by_id(id).await;
            self.barrier.wait().await;
            found
        }
        async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenancyError> {
            self.inner.get_by_slug(slug).await
        }
        async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>, TenancyError> {
            self.inner.get_by_domain(domain).await
        }
        async fn create(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
            self.inner.create(tenant).await
        }
        async fn update(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
            self.inner.update(tenant).await
        }
        async fn soft_delete(&self, id: Uuid) -> Result<bool, TenancyError> {
            self.inner.soft_delete(id).await
        }
        async fn list_expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Tenant>, TenancyError> {
            self.inner.list_expired_trials(now).await
        }
    }

    #[tokio::test]
    async fn concurrent_plan_changes_have_one_winner() {
        let store = Arc::new(Lockstep {
            inner: MemoryTenantStore::new(),
            barrier: Barrier::new(2),
        });
        let svc = Arc::new(TenantService::new(store.clone(), &TenancyConfig::default()));
        let t = store.create(&crate::model::fixtures::tenant("acme")).await.unwrap();

        let (a, b) = tokio::join!(
            svc.change_plan(t.id, Plan::Professional),
            svc.change_plan(t.id, Plan::Enterprise)
        );
        let (winner, loser) = match (a, b) {
            (Ok(w), Err(l)) => (w, l),
            (Err(l), Ok(w)) => (w, l),
            other => panic!("expected exactly one winner, got {:?}", other),
        };
        assert!(matches!(loser, TenancyError::ConcurrentUpdateConflict { tenant_id } if tenant_id == t.id));
        assert!(loser.is_retryable());
        let stored = store.inner.get_by_id(t.id).await.unwrap().unwrap();
        assert_eq!(stored.subscription.plan, winner.subscription.plan);
        assert_eq!(stored.version, t.version + 1);
    }

    #[tokio::test]
    async fn writes_load_past_a_stale_cache() {
        let inner = Arc::new(MemoryTenantStore::new());
        let cache = Arc::new(CachingTenantStore::new(inner.clone(), std::time::Duration::from_secs(60)));
        let svc = TenantService::new(cache.clone(), &TenancyConfig::default());
        let t = inner.create(&crate::model::fixtures::tenant("acme")).await.unwrap();
        cache.get_by_id(t.id).await.unwrap();

        let mut renamed = t.clone();
        renamed.name = "Acme Ltd".into();
        inner.update(&renamed).await.unwrap();

        let saved = svc.suspend(t.id, "chargeback").await.unwrap();
        assert_eq!(saved.name, "Acme Ltd");
        assert_eq!(saved.version, t.version + 2);
        assert_eq!(cache.get_by_id(t.id).await.unwrap().unwrap().status, TenantStatus::Suspended);
    }
}
