//! Routers: health checks, tenant administration, tenant-scoped endpoints.

mod admin;
mod common;
mod tenant;

pub use admin::admin_routes;
pub use common::common_routes_with_ready;
pub use tenant::tenant_routes;
