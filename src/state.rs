//! Shared application state for all routes.

use crate::config::TenancyConfig;
use crate::resolver::TenantResolver;
use crate::service::TenantService;
use crate::store::TenantStore;
use sqlx::PgPool;
use std::sync::Arc;

/// Store shared by the resolver and the service, so service writes invalidate what the resolver caches.
pub type SharedStore = Arc<dyn TenantStore>;

#[derive(Clone)]
pub struct AppState {
    /// Pinged by `/ready`; `None` when running on the in-memory store.
    pub pool: Option<PgPool>,
    pub resolver: Arc<TenantResolver<SharedStore>>,
    pub service: Arc<TenantService<SharedStore>>,
}

impl AppState {
    pub fn new(store: SharedStore, config: &TenancyConfig, pool: Option<PgPool>) -> Self {
        let resolver =
            TenantResolver::new(store.clone(), config.base_domain.clone()).with_timeout(config.request_timeout);
        AppState {
            pool,
            resolver: Arc::new(resolver),
            service: Arc::new(TenantService::new(store, config)),
        }
    }
}
