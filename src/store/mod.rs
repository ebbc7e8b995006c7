//! Tenant store: durable CRUD over the tenants table, no business rules.

mod cache;
mod memory;
mod postgres;

pub use cache::CachingTenantStore;
pub use memory::MemoryTenantStore;
pub use postgres::{ensure_tenant_tables, PgTenantStore};

use crate::error::TenancyError;
use crate::model::Tenant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Persistence contract for tenant records. Reads never return soft-deleted rows.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError>;

    /// `get_by_id` that skips any caching layer. Read-modify-write paths load
    /// through this so their optimistic check runs against the stored version.
    async fn get_by_id_fresh(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        self.get_by_id(id).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenancyError>;

    /// Case-insensitive exact match on the custom domain.
    async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>, TenancyError>;

    /// Insert a new record. Fails with `DuplicateSlug` / `DuplicateDomain` on uniqueness violations.
    async fn create(&self, tenant: &Tenant) -> Result<Tenant, TenancyError>;

    /// Full-record replace, accepted only when the stored `version` equals
    /// `tenant.version`. Returns the stored record with the bumped version.
    async fn update(&self, tenant: &Tenant) -> Result<Tenant, TenancyError>;

    /// Mark the record deleted. Returns false when no live record matched.
    async fn soft_delete(&self, id: Uuid) -> Result<bool, TenancyError>;

    /// Trials whose window closed at or before `now` but still read `trial`.
    async fn list_expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Tenant>, TenancyError>;
}

#[async_trait]
impl<S: TenantStore + ?Sized> TenantStore for std::sync::Arc<S> {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        (**self).get_by_id(id).await
    }

    async fn get_by_id_fresh(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        (**self).get_by_id_fresh(id).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenancyError> {
        (**self).get_by_slug(slug).await
    }

    async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>, TenancyError> {
        (**self).get_by_domain(domain).await
    }

    async fn create(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        (**self).create(tenant).await
    }

    async fn update(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        (**self).update(tenant).await
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, TenancyError> {
        (**self).soft_delete(id).await
    }

    async fn list_expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Tenant>, TenancyError> {
        (**self).list_expired_trials(now).await
    }
}
