//! Router tests driven with `tower::ServiceExt::oneshot` over the in-memory store.

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tenancy_core::state::SharedStore;
use tenancy_core::{
    admin_routes, common_routes_with_ready, tenant_routes, AppState, MemoryTenantStore, TenancyConfig,
};
use tower::ServiceExt;

fn setup() -> (AppState, Router) {
    let config = TenancyConfig {
        base_domain: "example.com".into(),
        ..TenancyConfig::default()
    };
    let store: SharedStore = Arc::new(MemoryTenantStore::new());
    let state = AppState::new(store, &config, None);
    let app = common_routes_with_ready(state.clone())
        .nest("/admin", admin_routes(state.clone()))
        .merge(tenant_routes(state.clone()));
    (state, app)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get_tenant(header: &str, value: &str) -> Request<Body> {
    Request::builder()
        .uri("/tenant")
        .header(header, value)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn resolved_tenant_is_served() {
    let (state, app) = setup();
    let acme = state.service.create_tenant("Acme", "acme").await.unwrap();

    let (status, body) = send(&app, get_tenant("X-Tenant-Slug", "acme")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], json!(acme.id.to_string()));
    assert_eq!(body["data"]["status"], json!("trial"));
    assert_eq!(body["data"]["subscription"]["plan"], json!("trial"));
    assert!(body["meta"]["trial_ends_at"].is_string());

    let (status, body) = send(&app, get_tenant("Host", "acme.example.com")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["slug"], json!("acme"));
}

#[tokio::test]
async fn unknown_and_unavailable_tenants_are_rejected() {
    let (state, app) = setup();
    let acme = state.service.create_tenant("Acme", "acme").await.unwrap();

    let (status, body) = send(&app, get_tenant("X-Tenant-Slug", "acme-typo")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("tenant_not_found"));

    state.service.suspend(acme.id, "fraud").await.unwrap();
    let (status, body) = send(&app, get_tenant("X-Tenant-ID", &acme.id.to_string())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("tenant_unavailable"));
    assert_eq!(body["error"]["message"], json!("tenant unavailable"));
    assert!(!body.to_string().contains("fraud"));
}

#[tokio::test]
async fn admin_lifecycle_over_http() {
    let (_, app) = setup();
    let (status, body) = send(&app, post_json("/admin/tenants", json!({ "name": "Acme", "slug": "acme" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["meta"]["version"], json!(1));

    let (status, _) = send(&app, post_json("/admin/tenants", json!({ "name": "Again", "slug": "acme" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, post_json(&format!("/admin/tenants/{}/plan", id), json!({ "plan": "professional" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("active"));
    assert_eq!(body["data"]["settings"]["max_users"], json!(100));
    assert_eq!(body["meta"]["version"], json!(2));

    let (status, body) = send(&app, post_json(&format!("/admin/tenants/{}/plan", id), json!({ "plan": "enterprise" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["settings"]["max_users"], json!(-1));

    let (status, _) = send(&app, post_json(&format!("/admin/tenants/{}/suspend", id), json!({ "reason": "" }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let delete = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/admin/tenants/{}", id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, get_tenant("X-Tenant-Slug", "acme")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, post_json("/admin/tenants/not-a-uuid/reactivate", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_checks_answer_without_a_database() {
    let (_, app) = setup();
    let req = Request::builder().uri("/ready").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}
