//! Subscription policy: plan tier to quotas and feature entitlements.

use crate::model::{Quota, TenantSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const GIB: u64 = 1024 * 1024 * 1024;

/// Feature tags a tenant can be entitled to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Users,
    Accounting,
    Inventory,
    Reports,
    Storefront,
    ApiAccess,
    Manufacturing,
    CustomDomain,
    Webhooks,
    AuditLog,
    Sso,
    PrioritySupport,
}

impl Feature {
    pub const ALL: [Feature; 12] = [
        Feature::Users,
        Feature::Accounting,
        Feature::Inventory,
        Feature::Reports,
        Feature::Storefront,
        Feature::ApiAccess,
        Feature::Manufacturing,
        Feature::CustomDomain,
        Feature::Webhooks,
        Feature::AuditLog,
        Feature::Sso,
        Feature::PrioritySupport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Users => "users",
            Feature::Accounting => "accounting",
            Feature::Inventory => "inventory",
            Feature::Reports => "reports",
            Feature::Storefront => "storefront",
            Feature::ApiAccess => "api_access",
            Feature::Manufacturing => "manufacturing",
            Feature::CustomDomain => "custom_domain",
            Feature::Webhooks => "webhooks",
            Feature::AuditLog => "audit_log",
            Feature::Sso => "sso",
            Feature::PrioritySupport => "priority_support",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing plan tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Trial,
    Starter,
    Professional,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Trial => "trial",
            Plan::Starter => "starter",
            Plan::Professional => "professional",
            Plan::Enterprise => "enterprise",
        }
    }

    /// Quotas and features granted by this plan.
    pub fn policy(&self) -> PlanPolicy {
        const BASE: [Feature; 4] = [Feature::Users, Feature::Accounting, Feature::Inventory, Feature::Reports];
        const STARTER: [Feature; 2] = [Feature::Storefront, Feature::ApiAccess];
        const PROFESSIONAL: [Feature; 4] = [
            Feature::Manufacturing,
            Feature::CustomDomain,
            Feature::Webhooks,
            Feature::AuditLog,
        ];

        match self {
            Plan::Trial => PlanPolicy {
                max_users: Quota::Bounded(10),
                max_storage_bytes: Quota::Bounded(10 * GIB),
                allowed_features: BASE.into_iter().collect(),
            },
            Plan::Starter => PlanPolicy {
                max_users: Quota::Bounded(25),
                max_storage_bytes: Quota::Bounded(50 * GIB),
                allowed_features: BASE.into_iter().chain(STARTER).collect(),
            },
            Plan::Professional => PlanPolicy {
                max_users: Quota::Bounded(100),
                max_storage_bytes: Quota::Bounded(250 * GIB),
                allowed_features: BASE.into_iter().chain(STARTER).chain(PROFESSIONAL).collect(),
            },
            Plan::Enterprise => PlanPolicy {
                max_users: Quota::Unlimited,
                max_storage_bytes: Quota::Unlimited,
                allowed_features: Feature::ALL.into_iter().collect(),
            },
        }
    }
}

impl std::str::FromStr for Plan {
    type Err = crate::error::TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trial" => Ok(Plan::Trial),
            "starter" => Ok(Plan::Starter),
            "professional" => Ok(Plan::Professional),
            "enterprise" => Ok(Plan::Enterprise),
            _ => Err(crate::error::TenancyError::Validation(format!(
                "unknown plan: {} (expected trial, starter, professional or enterprise)",
                s
            ))),
        }
    }
}

/// Resolved entitlements for one plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanPolicy {
    pub max_users: Quota,
    pub max_storage_bytes: Quota,
    pub allowed_features: BTreeSet<Feature>,
}

impl PlanPolicy {
    /// Overwrite quotas and features; display preferences are kept.
    pub fn apply_to(&self, settings: &mut TenantSettings) {
        settings.max_users = self.max_users;
        settings.max_storage_bytes = self.max_storage_bytes;
        settings.allowed_features = self.allowed_features.clone();
    }
}
