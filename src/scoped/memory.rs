//! In-process backend over JSON rows. Same tenant and NULL semantics as the SQL backend.

use crate::error::TenancyError;
use crate::scoped::backend::{
    AuditFinding, DataBackend, Outcome, OwnershipLink, ScopedOperation, ScopedRequest, ID_COLUMN, TENANT_COLUMN,
};
use crate::scoped::predicate::{compare, Predicate, Row};
use crate::sql::Ident;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryDataBackend {
    tables: RwLock<HashMap<Ident, Vec<Row>>>,
}

impl MemoryDataBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. Operations on undeclared tables fail like a missing relation.
    pub fn create_table(&self, name: &str) -> Result<(), TenancyError> {
        let name = Ident::new(name)?;
        let mut guard = self.write()?;
        guard.entry(name).or_default();
        Ok(())
    }

    /// Store a row exactly as given, bypassing tenant scoping. For fixtures and repair jobs.
    pub fn insert_unscoped(&self, table: &str, row: Row) -> Result<(), TenancyError> {
        let table = Ident::new(table)?;
        let mut guard = self.write()?;
        guard.entry(table).or_default().push(row);
        Ok(())
    }

    /// Every row of `table` across all tenants.
    pub fn dump(&self, table: &str) -> Result<Vec<Row>, TenancyError> {
        let table = Ident::new(table)?;
        let guard = self.read()?;
        Ok(guard.get(&table).cloned().unwrap_or_default())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Ident, Vec<Row>>>, TenancyError> {
        self.tables
            .read()
            .map_err(|_| TenancyError::Corrupt("data lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Ident, Vec<Row>>>, TenancyError> {
        self.tables
            .write()
            .map_err(|_| TenancyError::Corrupt("data lock poisoned".into()))
    }
}

fn unknown_table(table: &Ident) -> TenancyError {
    TenancyError::Validation(format!("unknown table {}", table))
}

fn owned_by(row: &Row, tenant: &Value) -> bool {
    row.get(TENANT_COLUMN) == Some(tenant)
}

/// `ORDER BY created_at, id` with NULLs last, as PostgreSQL sorts ascending.
fn listing_order(a: &Row, b: &Row) -> Ordering {
    for key in ["created_at", ID_COLUMN] {
        let x = a.get(key).filter(|v| !v.is_null());
        let y = b.get(key).filter(|v| !v.is_null());
        let ord = match (x, y) {
            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn assign(row: &mut Row, values: &[(Ident, Value)], skip: &[&str]) {
    for (col, v) in values {
        if !skip.contains(&col.as_str()) {
            row.insert(col.to_string(), v.clone());
        }
    }
}

#[async_trait]
impl DataBackend for MemoryDataBackend {
    async fn execute(&self, request: &ScopedRequest) -> Result<Outcome, TenancyError> {
        let tenant = Value::String(request.tenant_id().to_string());
        let table = request.table();
        match request.operation() {
            ScopedOperation::FindById { id } => {
                let by_id = Predicate::Eq(Ident::new(ID_COLUMN)?, id.clone());
                let guard = self.read()?;
                let rows = guard.get(table).ok_or_else(|| unknown_table(table))?;
                Ok(Outcome::Rows(
                    rows.iter()
                        .filter(|r| owned_by(r, &tenant) && by_id.matches(r))
                        .take(1)
                        .cloned()
                        .collect(),
                ))
            }
            ScopedOperation::List { filter, page } => {
                let guard = self.read()?;
                let rows = guard.get(table).ok_or_else(|| unknown_table(table))?;
                let mut matched: Vec<&Row> = rows.iter().filter(|r| owned_by(r, &tenant) && filter.matches(r)).collect();
                matched.sort_by(|a, b| listing_order(a, b));
                Ok(Outcome::Rows(
                    matched
                        .into_iter()
                        .skip(page.offset as usize)
                        .take(page.effective_limit() as usize)
                        .cloned()
                        .collect(),
                ))
            }
            ScopedOperation::Count { filter } => {
                let guard = self.read()?;
                let rows = guard.get(table).ok_or_else(|| unknown_table(table))?;
                let n = rows.iter().filter(|r| owned_by(r, &tenant) && filter.matches(r)).count();
                Ok(Outcome::Count(n as u64))
            }
            ScopedOperation::Insert { values } => {
                let mut row = Row::new();
                assign(&mut row, values, &[TENANT_COLUMN]);
                row.insert(TENANT_COLUMN.to_string(), tenant);
                row.entry(ID_COLUMN.to_string())
                    .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
                let mut guard = self.write()?;
                let rows = guard.get_mut(table).ok_or_else(|| unknown_table(table))?;
                rows.push(row.clone());
                Ok(Outcome::Rows(vec![row]))
            }
            ScopedOperation::Update { filter, values } => {
                let mut guard = self.write()?;
                let rows = guard.get_mut(table).ok_or_else(|| unknown_table(table))?;
                let now = Value::String(Utc::now().to_rfc3339());
                let mut changed = Vec::new();
                for row in rows.iter_mut().filter(|r| owned_by(r, &tenant) && filter.matches(r)) {
                    assign(row, values, &[TENANT_COLUMN, ID_COLUMN]);
                    if row.contains_key("updated_at") && !values.iter().any(|(c, _)| c.as_str() == "updated_at") {
                        row.insert("updated_at".to_string(), now.clone());
                    }
                    changed.push(row.clone());
                }
                Ok(Outcome::Rows(changed))
            }
            ScopedOperation::Delete { filter } => {
                let mut guard = self.write()?;
                let rows = guard.get_mut(table).ok_or_else(|| unknown_table(table))?;
                let mut removed = Vec::new();
                rows.retain(|r| {
                    if owned_by(r, &tenant) && filter.matches(r) {
                        removed.push(r.clone());
                        false
                    } else {
                        true
                    }
                });
                Ok(Outcome::Rows(removed))
            }
        }
    }

    async fn audit_ownership(&self, link: &OwnershipLink) -> Result<Vec<AuditFinding>, TenancyError> {
        let guard = self.read()?;
        let children = guard.get(&link.child).ok_or_else(|| unknown_table(&link.child))?;
        let parents = guard.get(&link.parent).ok_or_else(|| unknown_table(&link.parent))?;
        let cell = |r: &Row, c: &str| r.get(c).cloned().unwrap_or(Value::Null);

        let mut findings = Vec::new();
        for child in children {
            let fk = cell(child, link.foreign_key.as_str());
            if fk.is_null() {
                continue;
            }
            let Some(parent) = parents.iter().find(|p| p.get(ID_COLUMN) == Some(&fk)) else {
                continue;
            };
            let child_tenant = cell(child, TENANT_COLUMN);
            let parent_tenant = cell(parent, TENANT_COLUMN);
            if child_tenant != parent_tenant {
                findings.push(AuditFinding {
                    child_table: link.child.to_string(),
                    child_id: cell(child, ID_COLUMN),
                    child_tenant_id: child_tenant,
                    parent_table: link.parent.to_string(),
                    parent_id: fk,
                    parent_tenant_id: parent_tenant,
                });
            }
        }
        Ok(findings)
    }
}
