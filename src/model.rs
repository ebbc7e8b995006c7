//! Tenant record: the unit of isolation.

use crate::error::{ResolveError, TenancyError};
use crate::policy::{Feature, Plan};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Lifecycle status stored on the tenant row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Trial,
    Active,
    Inactive,
    Suspended,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Trial => "trial",
            TenantStatus::Active => "active",
            TenantStatus::Inactive => "inactive",
            TenantStatus::Suspended => "suspended",
        }
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(TenantStatus::Trial),
            "active" => Ok(TenantStatus::Active),
            "inactive" => Ok(TenantStatus::Inactive),
            "suspended" => Ok(TenantStatus::Suspended),
            _ => Err(TenancyError::Corrupt(format!("unknown tenant status: {}", s))),
        }
    }
}

/// A resource limit. Persisted as an integer where `-1` means unlimited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Quota {
    Unlimited,
    Bounded(u64),
}

impl Quota {
    /// Whether one more unit may be created when `used` already exist.
    pub fn allows(&self, used: u64) -> bool {
        match self {
            Quota::Unlimited => true,
            Quota::Bounded(limit) => used < *limit,
        }
    }

    /// Whether a total of `total` units stays within the limit.
    pub fn admits_total(&self, total: u64) -> bool {
        match self {
            Quota::Unlimited => true,
            Quota::Bounded(limit) => total <= *limit,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Quota::Unlimited => None,
            Quota::Bounded(limit) => Some(*limit),
        }
    }
}

impl TryFrom<i64> for Quota {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Quota::Unlimited),
            n if n >= 0 => Ok(Quota::Bounded(n as u64)),
            n => Err(format!("quota must be >= 0 or -1 (unlimited), got {}", n)),
        }
    }
}

impl From<Quota> for i64 {
    fn from(quota: Quota) -> Self {
        match quota {
            Quota::Unlimited => -1,
            Quota::Bounded(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
}

/// Quotas, entitlements and display preferences. Quotas and
/// `allowed_features` are written only through [`crate::policy::PlanPolicy::apply_to`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub max_users: Quota,
    pub max_storage_bytes: Quota,
    pub allowed_features: BTreeSet<Feature>,
    pub timezone: String,
    pub currency: String,
    #[serde(default)]
    pub branding: Branding,
}

impl Default for TenantSettings {
    fn default() -> Self {
        let mut settings = TenantSettings {
            max_users: Quota::Bounded(0),
            max_storage_bytes: Quota::Bounded(0),
            allowed_features: BTreeSet::new(),
            timezone: "UTC".into(),
            currency: "USD".into(),
            branding: Branding::default(),
        };
        Plan::Trial.policy().apply_to(&mut settings);
        settings
    }
}

impl TenantSettings {
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.allowed_features.contains(&feature)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: Plan,
    pub status: SubscriptionStatus,
    /// Inclusive start of the current billing period.
    pub current_period_start: DateTime<Utc>,
    /// Exclusive end of the current billing period.
    pub current_period_end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_billing_ref: Option<String>,
}

impl Subscription {
    /// Billing and webhook deliveries go out only for active subscriptions.
    pub fn is_deliverable(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub domain: Option<String>,
    pub status: TenantStatus,
    pub settings: TenantSettings,
    pub subscription: Subscription,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspend_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token; bumped by every successful update.
    pub version: i64,
}

impl Tenant {
    /// Whether a request may be bound to this tenant at `now`.
    ///
    /// A trial past `trial_ends_at` is rejected even while the stored status
    /// still reads `trial`. A trial with no end date is treated as expired.
    pub fn resolvability(&self, now: DateTime<Utc>) -> Result<(), ResolveError> {
        if self.deleted_at.is_some() {
            return Err(ResolveError::NotFound);
        }
        match self.status {
            TenantStatus::Active => Ok(()),
            TenantStatus::Trial => match self.trial_ends_at {
                Some(ends_at) if ends_at > now => Ok(()),
                _ => Err(ResolveError::TrialExpired),
            },
            TenantStatus::Inactive => Err(ResolveError::Inactive),
            TenantStatus::Suspended => Err(ResolveError::Suspended),
        }
    }

    /// Checks the status-dependent field invariants before a write.
    pub fn check_invariants(&self) -> Result<(), TenancyError> {
        match self.status {
            TenantStatus::Suspended => {
                let reason_ok = self.suspend_reason.as_deref().map(|r| !r.trim().is_empty()).unwrap_or(false);
                if self.suspended_at.is_none() || !reason_ok {
                    return Err(TenancyError::Validation(
                        "suspended tenant requires suspended_at and a non-empty suspend_reason".into(),
                    ));
                }
            }
            TenantStatus::Trial => {
                if self.trial_ends_at.is_none() {
                    return Err(TenancyError::Validation("trial tenant requires trial_ends_at".into()));
                }
            }
            TenantStatus::Active | TenantStatus::Inactive => {}
        }
        let granted = self.subscription.plan.policy().allowed_features;
        if !self.settings.allowed_features.is_subset(&granted) {
            return Err(TenancyError::Validation(format!(
                "allowed_features exceed plan {}",
                self.subscription.plan.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::Duration;

    /// Active starter tenant with the given slug.
    pub fn tenant(slug: &str) -> Tenant {
        let now = Utc::now();
        let mut settings = TenantSettings::default();
        Plan::Starter.policy().apply_to(&mut settings);
        Tenant {
            id: Uuid::new_v4(),
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            domain: None,
            status: TenantStatus::Active,
            settings,
            subscription: Subscription {
                plan: Plan::Starter,
                status: SubscriptionStatus::Active,
                current_period_start: now,
                current_period_end: now + Duration::days(30),
                external_billing_ref: None,
            },
            trial_ends_at: None,
            suspended_at: None,
            suspend_reason: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 1,
        }
    }
}
