//! Tenant administration routes. Mount behind the host's operator authentication.

use crate::handlers::admin::{change_plan, create_tenant, delete_tenant, expire_trials, reactivate, set_domain, suspend};
use crate::state::AppState;
use axum::{
    routing::{delete, post, put},
    Router,
};

pub fn admin_routes(state: AppState) -> Router {
    Router::new()
        .route("/tenants", post(create_tenant))
        .route("/tenants/expire-trials", post(expire_trials))
        .route("/tenants/:id", delete(delete_tenant))
        .route("/tenants/:id/plan", post(change_plan))
        .route("/tenants/:id/suspend", post(suspend))
        .route("/tenants/:id/reactivate", post(reactivate))
        .route("/tenants/:id/domain", put(set_domain))
        .with_state(state)
}
