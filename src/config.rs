//! Runtime configuration from environment variables.

use crate::error::ConfigError;
use std::time::Duration;

/// Settings for resolution, provisioning and storage deadlines.
#[derive(Clone, Debug)]
pub struct TenancyConfig {
    pub database_url: String,
    /// Schema holding the tenants table. Must be a valid PostgreSQL identifier.
    pub schema: String,
    /// Platform base domain; `acme.<base_domain>` resolves slug `acme`.
    pub base_domain: String,
    pub trial_days: i64,
    pub billing_period_days: i64,
    /// Zero disables the resolved-tenant cache.
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        TenancyConfig {
            database_url: "postgres://localhost/tenancy".into(),
            schema: "tenancy".into(),
            base_domain: "localhost".into(),
            trial_days: 14,
            billing_period_days: 30,
            cache_ttl: Duration::from_secs(5),
            request_timeout: Duration::from_millis(5000),
        }
    }
}

impl TenancyConfig {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "ignoring unreadable .env file");
            }
        }
        Self::from_env()
    }

    /// Read `DATABASE_URL` and `TENANCY_*` variables; unset keys keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = TenancyConfig::default();
        Ok(TenancyConfig {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            schema: std::env::var("TENANCY_SCHEMA").unwrap_or(defaults.schema),
            base_domain: std::env::var("TENANCY_BASE_DOMAIN")
                .map(|d| d.trim().trim_end_matches('.').to_lowercase())
                .unwrap_or(defaults.base_domain),
            trial_days: parse_var("TENANCY_TRIAL_DAYS", defaults.trial_days)?,
            billing_period_days: parse_var("TENANCY_BILLING_PERIOD_DAYS", defaults.billing_period_days)?,
            cache_ttl: Duration::from_secs(parse_var("TENANCY_CACHE_TTL_SECS", defaults.cache_ttl.as_secs())?),
            request_timeout: Duration::from_millis(parse_var(
                "TENANCY_REQUEST_TIMEOUT_MS",
                defaults.request_timeout.as_millis() as u64,
            )?),
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}
