//! Typed errors and HTTP mapping.

use crate::policy::Feature;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Why a request could not be bound to a tenant. Terminal for the request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveError {
    #[error("tenant not found")]
    NotFound,
    #[error("tenant is inactive")]
    Inactive,
    #[error("tenant is suspended")]
    Suspended,
    #[error("tenant trial has expired")]
    TrialExpired,
}

#[derive(Error, Debug)]
pub enum TenancyError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A scoped data call was made on a path that never went through resolution.
    #[error("tenant context missing")]
    MissingTenantContext,
    #[error("slug already taken: {0}")]
    DuplicateSlug(String),
    #[error("domain already taken: {0}")]
    DuplicateDomain(String),
    #[error("concurrent update conflict on tenant {tenant_id}")]
    ConcurrentUpdateConflict { tenant_id: Uuid },
    #[error("quota exceeded for {resource}: limit {limit}")]
    QuotaExceeded { resource: &'static str, limit: u64 },
    #[error("feature not available on current plan: {0}")]
    FeatureNotAvailable(Feature),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("storage deadline exceeded")]
    Timeout,
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

impl TenancyError {
    /// Whether the caller should re-read, recompute and try the write again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TenancyError::ConcurrentUpdateConflict { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            TenancyError::Resolve(ResolveError::NotFound) => "tenant_not_found",
            TenancyError::Resolve(_) => "tenant_unavailable",
            TenancyError::Config(_) => "config_error",
            TenancyError::MissingTenantContext => "missing_tenant_context",
            TenancyError::DuplicateSlug(_) => "duplicate_slug",
            TenancyError::DuplicateDomain(_) => "duplicate_domain",
            TenancyError::ConcurrentUpdateConflict { .. } => "concurrent_update_conflict",
            TenancyError::QuotaExceeded { .. } => "quota_exceeded",
            TenancyError::FeatureNotAvailable(_) => "feature_not_available",
            TenancyError::InvalidIdentifier(_) => "invalid_identifier",
            TenancyError::Validation(_) => "validation_error",
            TenancyError::Timeout => "timeout",
            TenancyError::Corrupt(_) => "corrupt_record",
            TenancyError::Db(_) => "database_error",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for TenancyError {
    fn into_response(self) -> Response {
        let status = match &self {
            TenancyError::Resolve(ResolveError::NotFound) => StatusCode::NOT_FOUND,
            TenancyError::Resolve(_) => StatusCode::FORBIDDEN,
            TenancyError::DuplicateSlug(_)
            | TenancyError::DuplicateDomain(_)
            | TenancyError::ConcurrentUpdateConflict { .. } => StatusCode::CONFLICT,
            TenancyError::QuotaExceeded { .. } | TenancyError::FeatureNotAvailable(_) => StatusCode::FORBIDDEN,
            TenancyError::InvalidIdentifier(_) | TenancyError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TenancyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            TenancyError::MissingTenantContext
            | TenancyError::Config(_)
            | TenancyError::Corrupt(_)
            | TenancyError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Inactive, suspended and expired tenants share one message.
        let message = match &self {
            TenancyError::Resolve(ResolveError::NotFound) => "tenant not found".to_string(),
            TenancyError::Resolve(_) => "tenant unavailable".to_string(),
            TenancyError::Db(_) | TenancyError::Corrupt(_) => "internal storage error".to_string(),
            other => other.to_string(),
        };
        let details = match &self {
            TenancyError::ConcurrentUpdateConflict { .. } => Some(serde_json::json!({ "retryable": true })),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = TenancyError::ConcurrentUpdateConflict { tenant_id: Uuid::new_v4() };
        assert!(conflict.is_retryable());
        assert!(!TenancyError::MissingTenantContext.is_retryable());
        assert!(!TenancyError::from(ResolveError::Suspended).is_retryable());
    }

    #[test]
    fn unavailable_tenants_share_a_response_code() {
        for e in [ResolveError::Inactive, ResolveError::Suspended, ResolveError::TrialExpired] {
            let err = TenancyError::from(e);
            assert_eq!(err.code(), "tenant_unavailable");
            assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
        }
        let missing = TenancyError::from(ResolveError::NotFound);
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }
}
