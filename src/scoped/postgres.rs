//! PostgreSQL backend: renders requests with the SQL builder and runs them on a pool.

use crate::error::TenancyError;
use crate::scoped::backend::{
    AuditFinding, DataBackend, Outcome, OwnershipLink, ScopedRequest, ID_COLUMN, TENANT_COLUMN,
};
use crate::scoped::predicate::Row;
use crate::scoped::ScopedOperation;
use crate::sql::{self, qualified, Ident, PgBindValue, QueryBuf, TableShape};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const COLUMNS_SQL: &str = "SELECT a.attname::text, format_type(a.atttypid, NULL) \
                           FROM pg_attribute a \
                           WHERE a.attrelid = to_regclass($1) AND a.attnum > 0 AND NOT a.attisdropped";

pub struct PgDataBackend {
    pool: PgPool,
    schema: Ident,
    shapes: RwLock<HashMap<Ident, Arc<TableShape>>>,
}

impl PgDataBackend {
    /// Business tables live in `schema`; each must carry a `tenant_id` column.
    pub fn new(pool: PgPool, schema: Ident) -> Self {
        PgDataBackend {
            pool,
            schema,
            shapes: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Forget cached column types, e.g. after a migration.
    pub fn forget_shapes(&self) {
        if let Ok(mut guard) = self.shapes.write() {
            guard.clear();
        }
    }

    async fn shape(&self, table: &Ident) -> Result<Arc<TableShape>, TenancyError> {
        if let Some(hit) = self.shapes.read().ok().and_then(|g| g.get(table).cloned()) {
            return Ok(hit);
        }
        let q_table = qualified(&self.schema, table);
        tracing::debug!(sql = %COLUMNS_SQL, table = %q_table, "query");
        let rows: Vec<(String, String)> = sqlx::query_as(COLUMNS_SQL)
            .bind(&q_table)
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(TenancyError::Validation(format!("unknown table {}", q_table)));
        }
        let shape = Arc::new(TableShape::new(q_table, rows.into_iter().collect()));
        if let Ok(mut guard) = self.shapes.write() {
            guard.insert(table.clone(), shape.clone());
        }
        Ok(shape)
    }

    async fn fetch_rows(&self, q: &QueryBuf) -> Result<Vec<Row>, TenancyError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, Value>(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let values = query.fetch_all(&self.pool).await?;
        values
            .into_iter()
            .map(|v| match v {
                Value::Object(row) => Ok(row),
                other => Err(TenancyError::Corrupt(format!("expected a row object, got {}", other))),
            })
            .collect()
    }

    async fn fetch_count(&self, q: &QueryBuf) -> Result<u64, TenancyError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query_scalar::<_, i64>(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        let n = query.fetch_one(&self.pool).await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[async_trait]
impl DataBackend for PgDataBackend {
    async fn execute(&self, request: &ScopedRequest) -> Result<Outcome, TenancyError> {
        let shape = self.shape(request.table()).await?;
        let q = sql::render(request, &shape)?;
        match request.operation() {
            ScopedOperation::Count { .. } => Ok(Outcome::Count(self.fetch_count(&q).await?)),
            _ => Ok(Outcome::Rows(self.fetch_rows(&q).await?)),
        }
    }

    async fn audit_ownership(&self, link: &OwnershipLink) -> Result<Vec<AuditFinding>, TenancyError> {
        let child = self.shape(&link.child).await?;
        let parent = self.shape(&link.parent).await?;
        let required = [
            (&child, link.foreign_key.as_str()),
            (&child, TENANT_COLUMN),
            (&child, ID_COLUMN),
            (&parent, TENANT_COLUMN),
            (&parent, ID_COLUMN),
        ];
        for (shape, col) in required {
            if !shape.has_column(col) {
                return Err(TenancyError::InvalidIdentifier(format!("{}.{}", shape.table, col)));
            }
        }
        let sql = sql::ownership_audit(link, &child.table, &parent.table);
        tracing::debug!(sql = %sql, "query");
        let rows: Vec<(Option<Value>, Option<Value>, Option<Value>, Option<Value>)> =
            sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(child_id, child_tenant, parent_id, parent_tenant)| AuditFinding {
                child_table: link.child.to_string(),
                child_id: child_id.unwrap_or(Value::Null),
                child_tenant_id: child_tenant.unwrap_or(Value::Null),
                parent_table: link.parent.to_string(),
                parent_id: parent_id.unwrap_or(Value::Null),
                parent_tenant_id: parent_tenant.unwrap_or(Value::Null),
            })
            .collect())
    }
}
