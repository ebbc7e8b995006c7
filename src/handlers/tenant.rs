//! Handlers running under a resolved tenant.

use crate::context::TenantContext;
use crate::response::resolved_context;
use axum::response::IntoResponse;

/// The tenant this request resolved to.
pub async fn current_tenant(ctx: TenantContext) -> impl IntoResponse {
    resolved_context(ctx)
}
