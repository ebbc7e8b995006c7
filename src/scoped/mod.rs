//! Tenant-scoped data access.
//!
//! Every operation takes the request's [`TenantContext`] and binds its id to
//! the operation before the backend sees it. Without a context the call
//! fails with [`TenancyError::MissingTenantContext`] and storage is never
//! touched. Callers cannot widen the scope: `tenant_id` in caller fields is
//! overwritten on insert and dropped on update, and the tenant predicate is
//! applied by the backend ahead of any caller filter.

mod backend;
mod memory;
mod postgres;
mod predicate;

pub use backend::{
    AuditFinding, DataBackend, Outcome, OwnershipLink, ScopedOperation, ScopedRequest, ID_COLUMN, TENANT_COLUMN,
};
pub use memory::MemoryDataBackend;
pub use postgres::PgDataBackend;
pub use predicate::{Fields, Page, Predicate, Row};

use crate::context::TenantContext;
use crate::deadline::run_until;
use crate::error::TenancyError;
use crate::sql::Ident;
use serde_json::Value;

pub struct ScopedDataAccess<B> {
    backend: B,
}

impl<B: DataBackend> ScopedDataAccess<B> {
    pub fn new(backend: B) -> Self {
        ScopedDataAccess { backend }
    }

    pub async fn find_by_id(
        &self,
        ctx: Option<&TenantContext>,
        table: &str,
        id: impl Into<Value>,
    ) -> Result<Option<Row>, TenancyError> {
        let id = id.into();
        let rows = self
            .rows(ctx, table, move || Ok(ScopedOperation::FindById { id }))
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn list(
        &self,
        ctx: Option<&TenantContext>,
        table: &str,
        filter: Predicate,
        page: Page,
    ) -> Result<Vec<Row>, TenancyError> {
        self.rows(ctx, table, move || Ok(ScopedOperation::List { filter, page }))
            .await
    }

    pub async fn count(&self, ctx: Option<&TenantContext>, table: &str, filter: Predicate) -> Result<u64, TenancyError> {
        match self.run(ctx, table, move || Ok(ScopedOperation::Count { filter })).await? {
            Outcome::Count(n) => Ok(n),
            Outcome::Rows(_) => Err(TenancyError::Corrupt("backend answered count with rows".into())),
        }
    }

    /// Insert one row owned by the context's tenant. A caller-supplied `tenant_id` is replaced.
    pub async fn insert(&self, ctx: Option<&TenantContext>, table: &str, fields: Fields) -> Result<Row, TenancyError> {
        let own = ctx.map(|c| Value::String(c.id().to_string()));
        let rows = self
            .rows(ctx, table, move || {
                let mut values = assignments(fields)?;
                values.retain(|(c, v)| {
                    if c.as_str() != TENANT_COLUMN {
                        return true;
                    }
                    if Some(v) != own.as_ref() {
                        tracing::warn!(supplied = %v, "insert carried a foreign tenant_id; overriding");
                    }
                    false
                });
                Ok(ScopedOperation::Insert { values })
            })
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| TenancyError::Corrupt("insert returned no row".into()))
    }

    /// Update matching rows of the context's tenant. `tenant_id` in `fields` is ignored.
    pub async fn update_where(
        &self,
        ctx: Option<&TenantContext>,
        table: &str,
        filter: Predicate,
        fields: Fields,
    ) -> Result<Vec<Row>, TenancyError> {
        self.rows(ctx, table, move || {
            let mut values = assignments(fields)?;
            values.retain(|(c, _)| c.as_str() != TENANT_COLUMN && c.as_str() != ID_COLUMN);
            if values.is_empty() {
                return Err(TenancyError::Validation("update has no assignable columns".into()));
            }
            Ok(ScopedOperation::Update { filter, values })
        })
        .await
    }

    /// Delete matching rows of the context's tenant and return them.
    pub async fn delete_where(
        &self,
        ctx: Option<&TenantContext>,
        table: &str,
        filter: Predicate,
    ) -> Result<Vec<Row>, TenancyError> {
        self.rows(ctx, table, move || Ok(ScopedOperation::Delete { filter }))
            .await
    }

    async fn rows<F>(&self, ctx: Option<&TenantContext>, table: &str, build: F) -> Result<Vec<Row>, TenancyError>
    where
        F: FnOnce() -> Result<ScopedOperation, TenancyError>,
    {
        match self.run(ctx, table, build).await? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Count(_) => Err(TenancyError::Corrupt("backend answered with a count".into())),
        }
    }

    async fn run<F>(&self, ctx: Option<&TenantContext>, table: &str, build: F) -> Result<Outcome, TenancyError>
    where
        F: FnOnce() -> Result<ScopedOperation, TenancyError>,
    {
        let Some(ctx) = ctx else {
            tracing::error!(table = %table, "data access attempted without a tenant context");
            return Err(TenancyError::MissingTenantContext);
        };
        let request = ScopedRequest::new(ctx.id(), Ident::new(table)?, build()?);
        tracing::debug!(
            tenant_id = %ctx.id(),
            table = %request.table(),
            op = request.operation().name(),
            "scoped data access"
        );
        run_until(ctx.deadline(), self.backend.execute(&request)).await
    }
}

/// Validated column assignments, in caller order.
fn assignments(fields: Fields) -> Result<Vec<(Ident, Value)>, TenancyError> {
    fields
        .into_iter()
        .map(|(k, v)| Ok((Ident::new(&k)?, v)))
        .collect()
}

/// Administrative cross-tenant checks. Not scoped to any tenant.
pub struct IsolationAuditor<B> {
    backend: B,
}

impl<B: DataBackend> IsolationAuditor<B> {
    pub fn new(backend: B) -> Self {
        IsolationAuditor { backend }
    }

    /// Child rows whose tenant differs from the tenant of the parent row they reference.
    pub async fn audit_ownership(&self, link: &OwnershipLink) -> Result<Vec<AuditFinding>, TenancyError> {
        let findings = self.backend.audit_ownership(link).await?;
        if findings.is_empty() {
            tracing::info!(child = %link.child, parent = %link.parent, "ownership audit clean");
        } else {
            tracing::error!(
                child = %link.child,
                parent = %link.parent,
                mismatches = findings.len(),
                "ownership audit found cross-tenant references"
            );
        }
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::tenant;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataBackend for Counting {
        async fn execute(&self, _request: &ScopedRequest) -> Result<Outcome, TenancyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Rows(vec![]))
        }

        async fn audit_ownership(&self, _link: &OwnershipLink) -> Result<Vec<AuditFinding>, TenancyError> {
            Ok(vec![])
        }
    }

    /// Never answers within a test's lifetime; records whether a call ran to the end.
    #[derive(Default)]
    struct Stalled {
        finished: AtomicUsize,
    }

    #[async_trait]
    impl DataBackend for Stalled {
        async fn execute(&self, _request: &ScopedRequest) -> Result<Outcome, TenancyError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::Rows(vec![]))
        }

        async fn audit_ownership(&self, _link: &OwnershipLink) -> Result<Vec<AuditFinding>, TenancyError> {
            Ok(vec![])
        }
    }

    fn fields(v: Value) -> Fields {
        match v {
            Value::Object(m) => m,
            _ => Fields::new(),
        }
    }

    fn access() -> (Arc<MemoryDataBackend>, ScopedDataAccess<Arc<MemoryDataBackend>>) {
        let backend = Arc::new(MemoryDataBackend::new());
        backend.create_table("invoices").unwrap();
        (backend.clone(), ScopedDataAccess::new(backend))
    }

    #[tokio::test]
    async fn missing_context_fails_before_storage() {
        let backend = Arc::new(Counting::default());
        let data = ScopedDataAccess::new(backend.clone());
        let err = data.list(None, "invoices", Predicate::All, Page::default()).await.unwrap_err();
        assert!(matches!(err, TenancyError::MissingTenantContext));
        let err = data.insert(None, "invoices", fields(json!({ "total": 1 }))).await.unwrap_err();
        assert!(matches!(err, TenancyError::MissingTenantContext));
        assert!(matches!(data.count(None, "invoices", Predicate::All).await, Err(TenancyError::MissingTenantContext)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn calls_past_the_context_deadline_are_aborted() {
        let backend = Arc::new(Stalled::default());
        let data = ScopedDataAccess::new(backend.clone());
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(50);
        let ctx = TenantContext::new(tenant("acme"), Some(deadline));

        let started = std::time::Instant::now();
        let err = data.list(Some(&ctx), "invoices", Predicate::All, Page::default()).await.unwrap_err();
        assert!(matches!(err, TenancyError::Timeout));
        let err = data.insert(Some(&ctx), "invoices", fields(json!({ "total": 1 }))).await.unwrap_err();
        assert!(matches!(err, TenancyError::Timeout));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(backend.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn insert_overrides_caller_tenant() {
        let (backend, data) = access();
        let ctx = TenantContext::new(tenant("acme"), None);
        let other = uuid::Uuid::new_v4();
        let row = data
            .insert(Some(&ctx), "invoices", fields(json!({ "tenant_id": other.to_string(), "total": 10 })))
            .await
            .unwrap();
        assert_eq!(row["tenant_id"], json!(ctx.id().to_string()));
        let all = backend.dump("invoices").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["tenant_id"], json!(ctx.id().to_string()));
    }

    #[tokio::test]
    async fn reads_and_writes_stay_inside_the_tenant() {
        let (_, data) = access();
        let a = TenantContext::new(tenant("acme"), None);
        let b = TenantContext::new(tenant("globex"), None);
        let row_a = data.insert(Some(&a), "invoices", fields(json!({ "status": "open" }))).await.unwrap();
        data.insert(Some(&b), "invoices", fields(json!({ "status": "open" }))).await.unwrap();

        assert!(data.find_by_id(Some(&b), "invoices", row_a["id"].clone()).await.unwrap().is_none());
        let open = Predicate::eq("status", "open").unwrap();
        assert_eq!(data.count(Some(&a), "invoices", open.clone()).await.unwrap(), 1);

        let wide_open = open.clone().or(Predicate::All);
        let changed = data
            .update_where(Some(&b), "invoices", wide_open.clone(), fields(json!({ "status": "paid", "tenant_id": a.id().to_string() })))
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0]["tenant_id"], json!(b.id().to_string()));
        assert_eq!(data.count(Some(&a), "invoices", open).await.unwrap(), 1);

        let removed = data.delete_where(Some(&b), "invoices", wide_open).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(data.count(Some(&a), "invoices", Predicate::All).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_with_only_protected_fields_is_rejected() {
        let (_, data) = access();
        let ctx = TenantContext::new(tenant("acme"), None);
        let err = data
            .update_where(Some(&ctx), "invoices", Predicate::All, fields(json!({ "tenant_id": "x", "id": "y" })))
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::Validation(_)));
    }

    #[tokio::test]
    async fn bad_identifiers_are_refused() {
        let (_, data) = access();
        let ctx = TenantContext::new(tenant("acme"), None);
        let err = data.count(Some(&ctx), "invoices; drop table x", Predicate::All).await.unwrap_err();
        assert!(matches!(err, TenancyError::InvalidIdentifier(_)));
        let err = data
            .insert(Some(&ctx), "invoices", fields(json!({ "Total\"": 1 })))
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn audit_reports_cross_tenant_children() {
        let backend = Arc::new(MemoryDataBackend::new());
        backend.create_table("orders").unwrap();
        backend.create_table("order_lines").unwrap();
        let (a, b) = (uuid::Uuid::new_v4().to_string(), uuid::Uuid::new_v4().to_string());
        backend.insert_unscoped("orders", fields(json!({ "id": "o1", "tenant_id": a }))).unwrap();
        backend
            .insert_unscoped("order_lines", fields(json!({ "id": "l1", "tenant_id": a, "order_id": "o1" })))
            .unwrap();
        backend
            .insert_unscoped("order_lines", fields(json!({ "id": "l2", "tenant_id": b, "order_id": "o1" })))
            .unwrap();

        let auditor = IsolationAuditor::new(backend);
        let link = OwnershipLink::new("order_lines", "order_id", "orders").unwrap();
        let findings = auditor.audit_ownership(&link).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].child_id, json!("l2"));
        assert_eq!(findings[0].child_tenant_id, json!(b));
        assert_eq!(findings[0].parent_tenant_id, json!(a));
    }
}
