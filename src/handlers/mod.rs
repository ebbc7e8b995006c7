//! HTTP handlers for tenant administration and tenant-scoped requests.

pub mod admin;
pub mod tenant;
