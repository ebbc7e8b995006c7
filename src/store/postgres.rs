//! PostgreSQL tenant store and DDL for the tenants table.

use crate::error::{ResolveError, TenancyError};
use crate::model::{Subscription, Tenant, TenantSettings};
use crate::sql::{qualified, Ident};
use crate::store::TenantStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

const TENANTS_TABLE: &str = "tenants";
const SLUG_INDEX: &str = "tenants_slug_live_key";
const DOMAIN_INDEX: &str = "tenants_domain_live_key";

const COLUMNS: &str = "id, name, slug, domain, status, settings, subscription, trial_ends_at, \
                       suspended_at, suspend_reason, created_at, updated_at, deleted_at, version";

/// Create the schema, the tenants table and the live-row unique indexes if missing.
/// Slug and domain are unique among rows with `deleted_at IS NULL` only.
pub async fn ensure_tenant_tables(pool: &PgPool, schema: &Ident) -> Result<(), TenancyError> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted()))
        .execute(pool)
        .await?;

    let q_table = qualified(schema, &Ident::new(TENANTS_TABLE)?);
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL,
            domain TEXT,
            status TEXT NOT NULL CHECK (status IN ('trial', 'active', 'inactive', 'suspended')),
            settings JSONB NOT NULL,
            subscription JSONB NOT NULL,
            trial_ends_at TIMESTAMPTZ,
            suspended_at TIMESTAMPTZ,
            suspend_reason TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            deleted_at TIMESTAMPTZ,
            version BIGINT NOT NULL DEFAULT 1
        )
        "#,
        q_table
    );
    sqlx::query(&ddl).execute(pool).await?;
    let alter_version = format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 1",
        q_table
    );
    sqlx::query(&alter_version).execute(pool).await?;

    let slug_index = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (slug) WHERE deleted_at IS NULL",
        SLUG_INDEX, q_table
    );
    sqlx::query(&slug_index).execute(pool).await?;
    let domain_index = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} (lower(domain)) WHERE deleted_at IS NULL AND domain IS NOT NULL",
        DOMAIN_INDEX, q_table
    );
    sqlx::query(&domain_index).execute(pool).await?;
    let trial_index = format!(
        "CREATE INDEX IF NOT EXISTS tenants_trial_ends_idx ON {} (trial_ends_at) WHERE status = 'trial' AND deleted_at IS NULL",
        q_table
    );
    sqlx::query(&trial_index).execute(pool).await?;
    Ok(())
}

/// DB-side row; JSONB columns decode straight into the typed settings.
#[derive(Debug, sqlx::FromRow)]
struct TenantRow {
    id: Uuid,
    name: String,
    slug: String,
    domain: Option<String>,
    status: String,
    settings: Json<TenantSettings>,
    subscription: Json<Subscription>,
    trial_ends_at: Option<DateTime<Utc>>,
    suspended_at: Option<DateTime<Utc>>,
    suspend_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    version: i64,
}

impl TenantRow {
    fn into_tenant(self) -> Result<Tenant, TenancyError> {
        Ok(Tenant {
            id: self.id,
            name: self.name,
            slug: self.slug,
            domain: self.domain,
            status: self.status.parse()?,
            settings: self.settings.0,
            subscription: self.subscription.0,
            trial_ends_at: self.trial_ends_at,
            suspended_at: self.suspended_at,
            suspend_reason: self.suspend_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
            version: self.version,
        })
    }
}

/// Map unique-index violations to the typed duplicate errors.
fn map_write_error(e: sqlx::Error, tenant: &Tenant) -> TenancyError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            match db.constraint() {
                Some(SLUG_INDEX) => return TenancyError::DuplicateSlug(tenant.slug.clone()),
                Some(DOMAIN_INDEX) => {
                    return TenancyError::DuplicateDomain(tenant.domain.clone().unwrap_or_default())
                }
                _ => {}
            }
        }
    }
    TenancyError::Db(e)
}

#[derive(Clone)]
pub struct PgTenantStore {
    pool: PgPool,
    table: String,
}

impl PgTenantStore {
    pub fn new(pool: PgPool, schema: &Ident) -> Result<Self, TenancyError> {
        Ok(PgTenantStore {
            pool,
            table: qualified(schema, &Ident::new(TENANTS_TABLE)?),
        })
    }

    async fn fetch_one_where(&self, predicate: &str, value: &str) -> Result<Option<Tenant>, TenancyError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} AND deleted_at IS NULL",
            COLUMNS, self.table, predicate
        );
        tracing::debug!(sql = %sql, param = %value, "query");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TenantRow::into_tenant).transpose()
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1 AND deleted_at IS NULL", COLUMNS, self.table);
        tracing::debug!(sql = %sql, tenant_id = %id, "query");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TenantRow::into_tenant).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenancyError> {
        self.fetch_one_where("slug = $1", slug).await
    }

    async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>, TenancyError> {
        self.fetch_one_where("lower(domain) = lower($1)", domain).await
    }

    async fn create(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NULL, 1) RETURNING {}",
            self.table, COLUMNS, COLUMNS
        );
        tracing::debug!(sql = %sql, tenant_id = %tenant.id, slug = %tenant.slug, "query");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(tenant.id)
            .bind(&tenant.name)
            .bind(&tenant.slug)
            .bind(tenant.domain.as_deref())
            .bind(tenant.status.as_str())
            .bind(Json(&tenant.settings))
            .bind(Json(&tenant.subscription))
            .bind(tenant.trial_ends_at)
            .bind(tenant.suspended_at)
            .bind(tenant.suspend_reason.as_deref())
            .bind(tenant.created_at)
            .bind(tenant.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, tenant))?;
        row.into_tenant()
    }

    async fn update(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        let sql = format!(
            "UPDATE {} SET name = $2, slug = $3, domain = $4, status = $5, settings = $6, subscription = $7, \
             trial_ends_at = $8, suspended_at = $9, suspend_reason = $10, updated_at = NOW(), version = version + 1 \
             WHERE id = $1 AND version = $11 AND deleted_at IS NULL RETURNING {}",
            self.table, COLUMNS
        );
        tracing::debug!(sql = %sql, tenant_id = %tenant.id, version = tenant.version, "query");
        let row = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(tenant.id)
            .bind(&tenant.name)
            .bind(&tenant.slug)
            .bind(tenant.domain.as_deref())
            .bind(tenant.status.as_str())
            .bind(Json(&tenant.settings))
            .bind(Json(&tenant.subscription))
            .bind(tenant.trial_ends_at)
            .bind(tenant.suspended_at)
            .bind(tenant.suspend_reason.as_deref())
            .bind(tenant.version)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_write_error(e, tenant))?;
        match row {
            Some(row) => row.into_tenant(),
            None => {
                // Zero rows: either the version moved on or the tenant is gone.
                let exists: (bool,) = sqlx::query_as(&format!(
                    "SELECT EXISTS(SELECT 1 FROM {} WHERE id = $1 AND deleted_at IS NULL)",
                    self.table
                ))
                .bind(tenant.id)
                .fetch_one(&self.pool)
                .await?;
                if exists.0 {
                    Err(TenancyError::ConcurrentUpdateConflict { tenant_id: tenant.id })
                } else {
                    Err(ResolveError::NotFound.into())
                }
            }
        }
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, TenancyError> {
        let sql = format!(
            "UPDATE {} SET deleted_at = NOW(), updated_at = NOW(), version = version + 1 \
             WHERE id = $1 AND deleted_at IS NULL",
            self.table
        );
        tracing::debug!(sql = %sql, tenant_id = %id, "query");
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Tenant>, TenancyError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE status = 'trial' AND deleted_at IS NULL \
             AND (trial_ends_at IS NULL OR trial_ends_at <= $1) ORDER BY created_at",
            COLUMNS, self.table
        );
        tracing::debug!(sql = %sql, "query");
        let rows = sqlx::query_as::<_, TenantRow>(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TenantRow::into_tenant).collect()
    }
}
