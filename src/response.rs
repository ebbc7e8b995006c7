//! `{ data, meta }` envelopes for tenant records, the resolved context and job results.

use crate::context::TenantContext;
use crate::model::Tenant;
use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize)]
pub struct Envelope<T, M> {
    pub data: T,
    pub meta: M,
}

/// Write metadata for a stored tenant. `version` is what the next write must match.
#[derive(Serialize)]
pub struct RecordMeta {
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct ContextMeta {
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct BatchMeta {
    pub count: u64,
    pub as_of: DateTime<Utc>,
}

pub type Reply<T, M> = (StatusCode, Json<Envelope<T, M>>);

fn record(status: StatusCode, tenant: Tenant) -> Reply<Tenant, RecordMeta> {
    let meta = RecordMeta {
        version: tenant.version,
        updated_at: tenant.updated_at,
    };
    (status, Json(Envelope { data: tenant, meta }))
}

pub fn tenant_created(tenant: Tenant) -> Reply<Tenant, RecordMeta> {
    record(StatusCode::CREATED, tenant)
}

pub fn tenant_saved(tenant: Tenant) -> Reply<Tenant, RecordMeta> {
    record(StatusCode::OK, tenant)
}

pub fn resolved_context(ctx: TenantContext) -> Reply<TenantContext, ContextMeta> {
    let meta = ContextMeta {
        version: ctx.tenant().version,
        trial_ends_at: ctx.tenant().trial_ends_at,
    };
    (StatusCode::OK, Json(Envelope { data: ctx, meta }))
}

pub fn batch<T: Serialize>(data: Vec<T>, as_of: DateTime<Utc>) -> Reply<Vec<T>, BatchMeta> {
    let count = data.len() as u64;
    (StatusCode::OK, Json(Envelope { data, meta: BatchMeta { count, as_of } }))
}
