//! Request-boundary extractors and the tenant resolution middleware.

mod middleware;
mod signals;

pub use middleware::resolve_tenant;
pub use signals::{TENANT_ID_HEADER, TENANT_SLUG_HEADER};
