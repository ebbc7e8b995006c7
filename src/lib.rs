//! Tenancy core: tenant resolution, tenant-scoped data access and subscription policy
//! for multi-tenant services on PostgreSQL and axum.

pub mod config;
pub mod context;
pub mod deadline;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod logging;
pub mod model;
pub mod policy;
pub mod resolver;
pub mod response;
pub mod routes;
pub mod scoped;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::TenancyConfig;
pub use context::TenantContext;
pub use error::{ConfigError, ResolveError, TenancyError};
pub use extractors::resolve_tenant;
pub use model::{Quota, Subscription, SubscriptionStatus, Tenant, TenantSettings, TenantStatus};
pub use policy::{Feature, Plan, PlanPolicy};
pub use resolver::{TenantResolver, TenantSignals};
pub use routes::{admin_routes, common_routes_with_ready, tenant_routes};
pub use scoped::{
    IsolationAuditor, MemoryDataBackend, OwnershipLink, Page, PgDataBackend, Predicate, ScopedDataAccess,
};
pub use service::TenantService;
pub use state::AppState;
pub use store::{ensure_tenant_tables, CachingTenantStore, MemoryTenantStore, PgTenantStore, TenantStore};
