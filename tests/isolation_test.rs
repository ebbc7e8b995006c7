//! Integration tests for tenant-scoped data access over the in-memory backend.

use serde_json::{json, Value};
use std::sync::Arc;
use tenancy_core::scoped::{Fields, Row};
use tenancy_core::{
    IsolationAuditor, MemoryDataBackend, MemoryTenantStore, OwnershipLink, Page, Plan, Predicate,
    ScopedDataAccess, TenancyConfig, TenancyError, TenantContext, TenantResolver, TenantService, TenantSignals,
};

type Backend = Arc<MemoryDataBackend>;

struct World {
    backend: Backend,
    data: ScopedDataAccess<Backend>,
    acme: TenantContext,
    globex: TenantContext,
}

fn fields(v: Value) -> Fields {
    match v {
        Value::Object(m) => m,
        _ => Fields::new(),
    }
}

/// Helper: two resolved tenants and an invoices table seeded for both.
async fn setup() -> World {
    let store = Arc::new(MemoryTenantStore::new());
    let service = TenantService::new(store.clone(), &TenancyConfig::default());
    for (name, slug) in [("Acme", "acme"), ("Globex", "globex")] {
        let t = service.create_tenant(name, slug).await.unwrap();
        service.change_plan(t.id, Plan::Starter).await.unwrap();
    }
    let resolver = TenantResolver::new(store, "localhost");
    let acme = resolver.resolve(&TenantSignals::new(None, Some("acme"), None)).await.unwrap();
    let globex = resolver.resolve(&TenantSignals::new(None, Some("globex"), None)).await.unwrap();

    let backend = Arc::new(MemoryDataBackend::new());
    backend.create_table("invoices").unwrap();
    let data = ScopedDataAccess::new(backend.clone());
    for (ctx, n) in [(&acme, 5), (&globex, 7)] {
        for i in 0..n {
            let status = if i % 2 == 0 { "open" } else { "paid" };
            data.insert(Some(ctx), "invoices", fields(json!({ "number": i, "status": status, "total": i * 100 })))
                .await
                .unwrap();
        }
    }
    World { backend, data, acme, globex }
}

fn owned_by(rows: &[Row], ctx: &TenantContext) -> bool {
    let own = json!(ctx.id().to_string());
    rows.iter().all(|r| r.get("tenant_id") == Some(&own))
}

#[tokio::test]
async fn list_never_crosses_tenants() {
    let w = setup().await;
    let filters = vec![
        Predicate::All,
        Predicate::eq("status", "open").unwrap(),
        Predicate::ne("status", "open").unwrap(),
        Predicate::gt("total", 0).unwrap().or(Predicate::All),
        Predicate::is_not_null("tenant_id").unwrap(),
        Predicate::is_null("status").unwrap().negate(),
        Predicate::is_in("tenant_id", [json!(w.globex.id().to_string())]).unwrap(),
    ];
    for filter in filters {
        let rows = w.data.list(Some(&w.acme), "invoices", filter.clone(), Page::default()).await.unwrap();
        assert!(owned_by(&rows, &w.acme), "cross-tenant row for {:?}", filter);
        let rows = w.data.list(Some(&w.globex), "invoices", filter.clone(), Page::default()).await.unwrap();
        assert!(owned_by(&rows, &w.globex), "cross-tenant row for {:?}", filter);
    }
    let all = w.data.list(Some(&w.acme), "invoices", Predicate::All, Page::default()).await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(w.data.count(Some(&w.globex), "invoices", Predicate::All).await.unwrap(), 7);
}

#[tokio::test]
async fn filtering_on_another_tenants_id_returns_nothing() {
    let w = setup().await;
    let sneaky = Predicate::eq("tenant_id", w.globex.id().to_string()).unwrap();
    let rows = w.data.list(Some(&w.acme), "invoices", sneaky, Page::default()).await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn insert_cannot_override_tenant() {
    let w = setup().await;
    let row = w
        .data
        .insert(
            Some(&w.acme),
            "invoices",
            fields(json!({ "number": 99, "tenant_id": w.globex.id().to_string() })),
        )
        .await
        .unwrap();
    assert_eq!(row["tenant_id"], json!(w.acme.id().to_string()));
    assert_eq!(w.data.count(Some(&w.globex), "invoices", Predicate::All).await.unwrap(), 7);
    assert_eq!(w.data.count(Some(&w.acme), "invoices", Predicate::All).await.unwrap(), 6);
}

#[tokio::test]
async fn find_by_id_only_sees_own_rows() {
    let w = setup().await;
    let theirs = w.data.list(Some(&w.globex), "invoices", Predicate::All, Page::new(Some(1), None)).await.unwrap();
    let id = theirs[0]["id"].clone();
    assert!(w.data.find_by_id(Some(&w.acme), "invoices", id.clone()).await.unwrap().is_none());
    assert!(w.data.find_by_id(Some(&w.globex), "invoices", id).await.unwrap().is_some());
}

#[tokio::test]
async fn writes_are_confined_to_the_caller() {
    let w = setup().await;
    let changed = w
        .data
        .update_where(Some(&w.acme), "invoices", Predicate::All, fields(json!({ "status": "void" })))
        .await
        .unwrap();
    assert_eq!(changed.len(), 5);
    let void = Predicate::eq("status", "void").unwrap();
    assert_eq!(w.data.count(Some(&w.globex), "invoices", void).await.unwrap(), 0);

    let removed = w.data.delete_where(Some(&w.globex), "invoices", Predicate::All).await.unwrap();
    assert_eq!(removed.len(), 7);
    assert_eq!(w.data.count(Some(&w.acme), "invoices", Predicate::All).await.unwrap(), 5);
}

#[tokio::test]
async fn every_operation_needs_a_context() {
    let w = setup().await;
    let before = w.backend.dump("invoices").unwrap();
    let missing = |r: Result<_, TenancyError>| matches!(r, Err(TenancyError::MissingTenantContext));

    assert!(missing(w.data.find_by_id(None, "invoices", "x").await.map(|_| ())));
    assert!(missing(w.data.list(None, "invoices", Predicate::All, Page::default()).await.map(|_| ())));
    assert!(missing(w.data.count(None, "invoices", Predicate::All).await.map(|_| ())));
    assert!(missing(w.data.insert(None, "invoices", fields(json!({ "number": 1 }))).await.map(|_| ())));
    assert!(missing(
        w.data
            .update_where(None, "invoices", Predicate::All, fields(json!({ "status": "x" })))
            .await
            .map(|_| ())
    ));
    assert!(missing(w.data.delete_where(None, "invoices", Predicate::All).await.map(|_| ())));

    assert_eq!(w.backend.dump("invoices").unwrap(), before);
}

#[tokio::test]
async fn audit_finds_no_mismatches_in_scoped_writes() {
    let w = setup().await;
    w.backend.create_table("payments").unwrap();
    let invoice = w.data.list(Some(&w.acme), "invoices", Predicate::All, Page::default()).await.unwrap();
    w.data
        .insert(Some(&w.acme), "payments", fields(json!({ "invoice_id": invoice[0]["id"].clone(), "amount": 5 })))
        .await
        .unwrap();

    let auditor = IsolationAuditor::new(w.backend.clone());
    let link = OwnershipLink::new("payments", "invoice_id", "invoices").unwrap();
    assert!(auditor.audit_ownership(&link).await.unwrap().is_empty());

    // A payment written under the wrong tenant pointing at an acme invoice.
    w.data
        .insert(Some(&w.globex), "payments", fields(json!({ "invoice_id": invoice[0]["id"].clone(), "amount": 1 })))
        .await
        .unwrap();
    let findings = auditor.audit_ownership(&link).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].child_tenant_id, json!(w.globex.id().to_string()));
    assert_eq!(findings[0].parent_tenant_id, json!(w.acme.id().to_string()));
}
