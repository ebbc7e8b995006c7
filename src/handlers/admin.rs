//! Administrative tenant lifecycle handlers.

use crate::error::{ResolveError, TenancyError};
use crate::policy::Plan;
use crate::response::{batch, tenant_created, tenant_saved};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

/// Malformed ids are reported like unknown ones.
fn parse_tenant_id(raw: &str) -> Result<Uuid, TenancyError> {
    Uuid::parse_str(raw).map_err(|_| ResolveError::NotFound.into())
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantBody {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanBody {
    pub plan: Plan,
}

#[derive(Debug, Deserialize)]
pub struct SuspendBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct DomainBody {
    #[serde(default)]
    pub domain: Option<String>,
}

pub async fn create_tenant(
    State(state): State<AppState>,
    Json(body): Json<CreateTenantBody>,
) -> Result<impl IntoResponse, TenancyError> {
    let tenant = state.service.create_tenant(&body.name, &body.slug).await?;
    Ok(tenant_created(tenant))
}

pub async fn change_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ChangePlanBody>,
) -> Result<impl IntoResponse, TenancyError> {
    let tenant = state.service.change_plan(parse_tenant_id(&id)?, body.plan).await?;
    Ok(tenant_saved(tenant))
}

pub async fn suspend(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SuspendBody>,
) -> Result<impl IntoResponse, TenancyError> {
    let tenant = state.service.suspend(parse_tenant_id(&id)?, &body.reason).await?;
    Ok(tenant_saved(tenant))
}

pub async fn reactivate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, TenancyError> {
    let tenant = state.service.reactivate(parse_tenant_id(&id)?).await?;
    Ok(tenant_saved(tenant))
}

pub async fn delete_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, TenancyError> {
    state.service.delete_tenant(parse_tenant_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_domain(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DomainBody>,
) -> Result<impl IntoResponse, TenancyError> {
    let tenant = state
        .service
        .set_custom_domain(parse_tenant_id(&id)?, body.domain.as_deref())
        .await?;
    Ok(tenant_saved(tenant))
}

pub async fn expire_trials(State(state): State<AppState>) -> Result<impl IntoResponse, TenancyError> {
    let now = Utc::now();
    let expired = state.service.expire_trials(now).await?;
    Ok(batch(expired, now))
}
