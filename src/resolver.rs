//! Tenant resolution: request signals to exactly one resolvable tenant.

use crate::context::TenantContext;
use crate::deadline::run_until;
use crate::error::{ResolveError, TenancyError};
use crate::model::Tenant;
use crate::store::TenantStore;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Tenant-identifying signals taken from the request boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TenantSignals {
    tenant_id: Option<String>,
    slug: Option<String>,
    host: Option<String>,
}

impl TenantSignals {
    /// Blank values count as absent. The host is lowercased and loses its port and trailing dot.
    pub fn new(tenant_id: Option<&str>, slug: Option<&str>, host: Option<&str>) -> Self {
        TenantSignals {
            tenant_id: non_blank(tenant_id),
            slug: non_blank(slug),
            host: host.and_then(normalize_host),
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.tenant_id.is_none() && self.slug.is_none() && self.host.is_none()
    }
}

fn non_blank(v: Option<&str>) -> Option<String> {
    v.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

fn normalize_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let without_port = if let Some(rest) = raw.strip_prefix('[') {
        // IPv6 literal: [::1]:8080
        rest.split(']').next().unwrap_or(rest)
    } else {
        raw.rsplit_once(':').map(|(h, _)| h).unwrap_or(raw)
    };
    let host = without_port.trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Single-label slug under `base_domain`, e.g. `acme` for `acme.example.com`.
pub fn subdomain_slug<'a>(host: &'a str, base_domain: &str) -> Option<&'a str> {
    let label = host.strip_suffix(base_domain)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') {
        None
    } else {
        Some(label)
    }
}

/// Which signal class decided the lookup; recorded in logs only.
#[derive(Clone, Copy, Debug)]
enum SignalKind {
    TenantId,
    Slug,
    Domain,
    Subdomain,
    None,
}

pub struct TenantResolver<S> {
    store: S,
    base_domain: String,
    timeout: Option<Duration>,
}

impl<S: TenantStore> TenantResolver<S> {
    pub fn new(store: S, base_domain: impl Into<String>) -> Self {
        TenantResolver {
            store,
            base_domain: base_domain.into().trim_end_matches('.').to_lowercase(),
            timeout: None,
        }
    }

    /// Request-scoped deadline applied to resolution and carried by the context.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn resolve(&self, signals: &TenantSignals) -> Result<TenantContext, TenancyError> {
        self.resolve_at(signals, Utc::now()).await
    }

    /// Resolve against a fixed clock. The first signal present decides the
    /// lookup; a miss is `NotFound` and never falls through to a later signal.
    pub async fn resolve_at(&self, signals: &TenantSignals, now: DateTime<Utc>) -> Result<TenantContext, TenancyError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let (kind, found) = run_until(deadline, self.lookup(signals)).await?;
        let tenant = match found {
            Some(t) => t,
            None => {
                tracing::debug!(signal = ?kind, "tenant resolution failed: not found");
                return Err(ResolveError::NotFound.into());
            }
        };
        if let Err(e) = tenant.resolvability(now) {
            tracing::debug!(tenant_id = %tenant.id, signal = ?kind, error = %e, "tenant resolution failed");
            return Err(e.into());
        }
        tracing::debug!(tenant_id = %tenant.id, slug = %tenant.slug, signal = ?kind, "tenant resolved");
        Ok(TenantContext::new(tenant, deadline))
    }

    async fn lookup(&self, signals: &TenantSignals) -> Result<(SignalKind, Option<Tenant>), TenancyError> {
        if let Some(raw) = signals.tenant_id() {
            let found = match Uuid::parse_str(raw) {
                Ok(id) => self.store.get_by_id(id).await?,
                Err(_) => None,
            };
            return Ok((SignalKind::TenantId, found));
        }
        if let Some(slug) = signals.slug() {
            return Ok((SignalKind::Slug, self.store.get_by_slug(slug).await?));
        }
        if let Some(host) = signals.host() {
            if let Some(t) = self.store.get_by_domain(host).await? {
                return Ok((SignalKind::Domain, Some(t)));
            }
            let found = match subdomain_slug(host, &self.base_domain) {
                Some(slug) => self.store.get_by_slug(slug).await?,
                None => None,
            };
            return Ok((SignalKind::Subdomain, found));
        }
        Ok((SignalKind::None, None))
    }
}
