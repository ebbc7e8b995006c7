//! Routes that require a resolved tenant.

use crate::extractors::resolve_tenant;
use crate::handlers::tenant::current_tenant;
use crate::state::AppState;
use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower::ServiceBuilder;

/// `GET /tenant`, behind [`resolve_tenant`]. Host routes that take a
/// `TenantContext` need the same layer.
pub fn tenant_routes(state: AppState) -> Router {
    Router::new()
        .route("/tenant", get(current_tenant))
        .layer(ServiceBuilder::new().layer(from_fn_with_state(state.clone(), resolve_tenant)))
        .with_state(state)
}
