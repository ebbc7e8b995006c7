//! Resolve the tenant once per request and attach the context for handlers.

use crate::context::TenantContext;
use crate::resolver::TenantSignals;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Use with `axum::middleware::from_fn_with_state`. A context already
/// attached upstream is kept as is; resolution failures end the request.
pub async fn resolve_tenant(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if request.extensions().get::<TenantContext>().is_none() {
        let signals = TenantSignals::from_headers(request.headers(), request.uri());
        match state.resolver.resolve(&signals).await {
            Ok(ctx) => {
                request.extensions_mut().insert(ctx);
            }
            Err(e) => {
                tracing::info!(path = %request.uri().path(), error = %e, "tenant resolution rejected request");
                return e.into_response();
            }
        }
    }
    next.run(request).await
}
