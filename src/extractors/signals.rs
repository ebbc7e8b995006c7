//! Read tenant signals from headers.

use crate::resolver::TenantSignals;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, Uri},
};

/// Explicit tenant id. Highest precedence.
pub const TENANT_ID_HEADER: &str = "X-Tenant-ID";
/// Explicit tenant slug.
pub const TENANT_SLUG_HEADER: &str = "X-Tenant-Slug";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl TenantSignals {
    /// Signals from `X-Tenant-ID`, `X-Tenant-Slug` and `Host` (or the URI authority).
    pub fn from_headers(headers: &HeaderMap, uri: &Uri) -> Self {
        let host = header_str(headers, header::HOST.as_str()).or_else(|| uri.authority().map(|a| a.as_str()));
        TenantSignals::new(
            header_str(headers, TENANT_ID_HEADER),
            header_str(headers, TENANT_SLUG_HEADER),
            host,
        )
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantSignals
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(TenantSignals::from_headers(&parts.headers, &parts.uri))
    }
}
