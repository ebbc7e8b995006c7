//! The storage seam behind [`super::ScopedDataAccess`].
//!
//! A [`ScopedRequest`] carries the tenant id as its own field, separate from
//! anything the caller supplied. Backends must apply it as the first
//! conjunct of every read and write; they never see an unscoped request.

use crate::error::TenancyError;
use crate::scoped::predicate::{Page, Predicate, Row};
use crate::sql::Ident;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Column every tenant-scoped table carries.
pub const TENANT_COLUMN: &str = "tenant_id";
/// Primary key column used by `find_by_id` and the ownership audit.
pub const ID_COLUMN: &str = "id";

#[derive(Clone, Debug, PartialEq)]
pub enum ScopedOperation {
    FindById { id: Value },
    List { filter: Predicate, page: Page },
    Count { filter: Predicate },
    Insert { values: Vec<(Ident, Value)> },
    Update { filter: Predicate, values: Vec<(Ident, Value)> },
    Delete { filter: Predicate },
}

impl ScopedOperation {
    pub fn name(&self) -> &'static str {
        match self {
            ScopedOperation::FindById { .. } => "find_by_id",
            ScopedOperation::List { .. } => "list",
            ScopedOperation::Count { .. } => "count",
            ScopedOperation::Insert { .. } => "insert",
            ScopedOperation::Update { .. } => "update_where",
            ScopedOperation::Delete { .. } => "delete_where",
        }
    }
}

/// One operation bound to one tenant. Only the facade builds these.
#[derive(Clone, Debug)]
pub struct ScopedRequest {
    tenant_id: Uuid,
    table: Ident,
    op: ScopedOperation,
}

impl ScopedRequest {
    pub(crate) fn new(tenant_id: Uuid, table: Ident, op: ScopedOperation) -> Self {
        ScopedRequest { tenant_id, table, op }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn table(&self) -> &Ident {
        &self.table
    }

    pub fn operation(&self) -> &ScopedOperation {
        &self.op
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Rows(Vec<Row>),
    Count(u64),
}

/// A child table whose `foreign_key` references `parent.id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnershipLink {
    pub child: Ident,
    pub foreign_key: Ident,
    pub parent: Ident,
}

impl OwnershipLink {
    pub fn new(child: &str, foreign_key: &str, parent: &str) -> Result<Self, TenancyError> {
        Ok(OwnershipLink {
            child: Ident::new(child)?,
            foreign_key: Ident::new(foreign_key)?,
            parent: Ident::new(parent)?,
        })
    }
}

/// A child row whose tenant differs from the tenant of the parent it references.
#[derive(Clone, Debug, PartialEq, Serialize, serde::Deserialize)]
pub struct AuditFinding {
    pub child_table: String,
    pub child_id: Value,
    pub child_tenant_id: Value,
    pub parent_table: String,
    pub parent_id: Value,
    pub parent_tenant_id: Value,
}

#[async_trait]
pub trait DataBackend: Send + Sync {
    /// Run one tenant-bound operation. `Count` yields `Outcome::Count`; all others yield rows.
    async fn execute(&self, request: &ScopedRequest) -> Result<Outcome, TenancyError>;

    /// Cross-tenant scan for ownership mismatches along `link`. Administrative only.
    async fn audit_ownership(&self, link: &OwnershipLink) -> Result<Vec<AuditFinding>, TenancyError>;
}

#[async_trait]
impl<B: DataBackend + ?Sized> DataBackend for Arc<B> {
    async fn execute(&self, request: &ScopedRequest) -> Result<Outcome, TenancyError> {
        (**self).execute(request).await
    }

    async fn audit_ownership(&self, link: &OwnershipLink) -> Result<Vec<AuditFinding>, TenancyError> {
        (**self).audit_ownership(link).await
    }
}
