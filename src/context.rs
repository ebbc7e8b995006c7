//! Immutable request-scoped handle on the resolved tenant.
//!
//! A `TenantContext` can only be minted by [`crate::resolver::TenantResolver`];
//! business code can read and clone it but never construct or alter one.

use crate::error::TenancyError;
use crate::model::{Subscription, Tenant, TenantSettings, TenantStatus};
use crate::policy::Feature;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct TenantContext {
    tenant: Arc<Tenant>,
    deadline: Option<Instant>,
}

impl TenantContext {
    pub(crate) fn new(tenant: Tenant, deadline: Option<Instant>) -> Self {
        TenantContext {
            tenant: Arc::new(tenant),
            deadline,
        }
    }

    pub fn id(&self) -> Uuid {
        self.tenant.id
    }

    pub fn slug(&self) -> &str {
        &self.tenant.slug
    }

    pub fn status(&self) -> TenantStatus {
        self.tenant.status
    }

    pub fn settings(&self) -> &TenantSettings {
        &self.tenant.settings
    }

    pub fn subscription(&self) -> &Subscription {
        &self.tenant.subscription
    }

    /// Snapshot of the record as it was at resolution time.
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    /// Deadline for storage calls made on behalf of this request.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn require_feature(&self, feature: Feature) -> Result<(), TenancyError> {
        if self.tenant.settings.has_feature(feature) {
            Ok(())
        } else {
            Err(TenancyError::FeatureNotAvailable(feature))
        }
    }

    /// Err when creating one more user would exceed `max_users`.
    pub fn check_user_quota(&self, current_users: u64) -> Result<(), TenancyError> {
        let quota = self.tenant.settings.max_users;
        if quota.allows(current_users) {
            Ok(())
        } else {
            Err(TenancyError::QuotaExceeded {
                resource: "users",
                limit: quota.limit().unwrap_or(u64::MAX),
            })
        }
    }

    /// Err when storing `additional` bytes on top of `used` would exceed `max_storage_bytes`.
    pub fn check_storage_quota(&self, used: u64, additional: u64) -> Result<(), TenancyError> {
        let quota = self.tenant.settings.max_storage_bytes;
        if quota.admits_total(used.saturating_add(additional)) {
            Ok(())
        } else {
            Err(TenancyError::QuotaExceeded {
                resource: "storage_bytes",
                limit: quota.limit().unwrap_or(u64::MAX),
            })
        }
    }
}

/// Collaborator-facing view: id, status, settings and subscription.
impl Serialize for TenantContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("TenantContext", 5)?;
        s.serialize_field("id", &self.tenant.id)?;
        s.serialize_field("slug", &self.tenant.slug)?;
        s.serialize_field("status", &self.tenant.status)?;
        s.serialize_field("settings", &self.tenant.settings)?;
        s.serialize_field("subscription", &self.tenant.subscription)?;
        s.end()
    }
}

/// Reads the context attached by the resolution middleware.
#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = TenancyError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<TenantContext>().cloned().ok_or_else(|| {
            tracing::error!(path = %parts.uri.path(), "handler requires a tenant context but none was attached");
            TenancyError::MissingTenantContext
        })
    }
}
