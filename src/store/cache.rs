//! Read-through cache of tenant lookups with a short TTL.
//!
//! Writes that go through this wrapper drop the tenant's entries before they
//! return, so callers of the same instance never see a stale status. A read
//! that was already in flight when such a write landed is returned to its
//! caller but not cached. Writes made elsewhere (another process, or the
//! inner store directly) become visible after at most `ttl`.

use crate::error::TenancyError;
use crate::model::Tenant;
use crate::store::TenantStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheKey {
    Id(Uuid),
    Slug(String),
    Domain(String),
}

#[derive(Default)]
struct Entries {
    map: HashMap<CacheKey, (Tenant, Instant)>,
    /// Bumped by every invalidation. A load started under an older generation is not stored.
    generation: u64,
}

enum Lookup {
    Hit(Tenant),
    Miss(u64),
    Unavailable,
}

pub struct CachingTenantStore<S> {
    inner: S,
    ttl: Duration,
    entries: RwLock<Entries>,
}

impl<S: TenantStore> CachingTenantStore<S> {
    /// A zero `ttl` disables caching; every read goes to `inner`.
    pub fn new(inner: S, ttl: Duration) -> Self {
        CachingTenantStore {
            inner,
            ttl,
            entries: RwLock::new(Entries::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn lookup(&self, key: &CacheKey) -> Lookup {
        let Ok(guard) = self.entries.read() else {
            return Lookup::Unavailable;
        };
        match guard.map.get(key) {
            Some((tenant, stored_at)) if stored_at.elapsed() < self.ttl => Lookup::Hit(tenant.clone()),
            _ => Lookup::Miss(guard.generation),
        }
    }

    fn remember(&self, key: CacheKey, tenant: &Tenant, seen: u64) {
        if self.ttl.is_zero() {
            return;
        }
        if let Ok(mut guard) = self.entries.write() {
            if guard.generation != seen {
                tracing::trace!(tenant_id = %tenant.id, "tenant changed during load, not caching");
                return;
            }
            let now = Instant::now();
            guard.map.retain(|_, (_, stored_at)| now.duration_since(*stored_at) < self.ttl);
            guard.map.insert(key, (tenant.clone(), now));
        }
    }

    /// Drop every entry that points at `id` and fence off loads already in flight.
    pub fn invalidate(&self, id: Uuid) {
        match self.entries.write() {
            Ok(mut guard) => {
                guard.generation = guard.generation.wrapping_add(1);
                guard.map.retain(|_, (t, _)| t.id != id);
            }
            Err(poisoned) => {
                tracing::error!(tenant_id = %id, "tenant cache lock poisoned, clearing");
                let mut guard = poisoned.into_inner();
                guard.generation = guard.generation.wrapping_add(1);
                guard.map.clear();
            }
        }
    }

    async fn read_through<F, Fut>(&self, key: CacheKey, load: F) -> Result<Option<Tenant>, TenancyError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Option<Tenant>, TenancyError>>,
    {
        let seen = match self.lookup(&key) {
            Lookup::Hit(hit) => {
                tracing::trace!(tenant_id = %hit.id, "tenant cache hit");
                return Ok(Some(hit));
            }
            Lookup::Unavailable => return load().await,
            Lookup::Miss(generation) => generation,
        };
        let loaded = load().await?;
        if let Some(tenant) = &loaded {
            self.remember(key, tenant, seen);
        }
        Ok(loaded)
    }
}

#[async_trait]
impl<S: TenantStore> TenantStore for CachingTenantStore<S> {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        self.read_through(CacheKey::Id(id), || self.inner.get_by_id(id)).await
    }

    async fn get_by_id_fresh(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        self.inner.get_by_id_fresh(id).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenancyError> {
        self.read_through(CacheKey::Slug(slug.to_string()), || self.inner.get_by_slug(slug))
            .await
    }

    async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>, TenancyError> {
        self.read_through(CacheKey::Domain(domain.to_lowercase()), || self.inner.get_by_domain(domain))
            .await
    }

    async fn create(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        let created = self.inner.create(tenant).await;
        self.invalidate(tenant.id);
        created
    }

    async fn update(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        let updated = self.inner.update(tenant).await;
        self.invalidate(tenant.id);
        updated
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, TenancyError> {
        let deleted = self.inner.soft_delete(id).await;
        self.invalidate(id);
        deleted
    }

    async fn list_expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Tenant>, TenancyError> {
        self.inner.list_expired_trials(now).await
    }
}
