//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE for tenant-bound requests.
//!
//! Every statement binds the tenant id as `$1` and places `"tenant_id" = $1`
//! first in its WHERE clause (or first in its column list, for INSERT).
//! Identifiers come from [`Ident`]; values are always parameters cast to the
//! column's catalog type.

use crate::error::TenancyError;
use crate::scoped::{OwnershipLink, Page, Predicate, ScopedOperation, ScopedRequest, ID_COLUMN, TENANT_COLUMN};
use crate::sql::Ident;
use serde_json::Value;
use std::collections::HashMap;

/// Alias the row is selected under so `to_jsonb` can return it whole.
const ROW_ALIAS: &str = "_r";

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// Qualified table name plus column name -> SQL type, as read from the catalog.
#[derive(Clone, Debug, Default)]
pub struct TableShape {
    pub table: String,
    pub columns: HashMap<String, String>,
}

impl TableShape {
    pub fn new(table: String, columns: HashMap<String, String>) -> Self {
        TableShape { table, columns }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    fn column_type(&self, column: &Ident) -> Result<&str, TenancyError> {
        self.columns
            .get(column.as_str())
            .map(String::as_str)
            .ok_or_else(|| TenancyError::InvalidIdentifier(format!("{}.{}", self.table, column)))
    }

    /// `$n::type` for a value bound against `column`.
    fn placeholder(&self, q: &mut QueryBuf, column: &Ident, v: Value) -> Result<String, TenancyError> {
        let ty = self.column_type(column)?;
        let n = q.push_param(v);
        Ok(format!("${}::{}", n, ty))
    }
}

/// Render one scoped request against a table shape.
pub fn render(req: &ScopedRequest, shape: &TableShape) -> Result<QueryBuf, TenancyError> {
    let tenant_col = Ident::new(TENANT_COLUMN)?;
    let tenant_type = shape.columns.get(TENANT_COLUMN).ok_or_else(|| {
        TenancyError::Validation(format!("table {} has no {} column", shape.table, TENANT_COLUMN))
    })?;

    let mut q = QueryBuf::new();
    let tenant_param = q.push_param(Value::String(req.tenant_id().to_string()));
    let tenant_term = format!("{} = ${}::{}", tenant_col.quoted(), tenant_param, tenant_type);

    match req.operation() {
        ScopedOperation::FindById { id } => {
            let id_col = Ident::new(ID_COLUMN)?;
            let ph = shape.placeholder(&mut q, &id_col, id.clone())?;
            q.sql = format!(
                "SELECT to_jsonb({a}) FROM {t} {a} WHERE {tenant} AND {id} = {ph} LIMIT 1",
                a = ROW_ALIAS,
                t = shape.table,
                tenant = tenant_term,
                id = id_col.quoted(),
                ph = ph
            );
        }
        ScopedOperation::List { filter, page } => {
            let cond = render_predicate(filter, shape, &mut q)?;
            q.sql = format!(
                "SELECT to_jsonb({a}) FROM {t} {a} WHERE {tenant} AND ({cond}){order}{window}",
                a = ROW_ALIAS,
                t = shape.table,
                tenant = tenant_term,
                cond = cond,
                order = order_clause(shape),
                window = window_clause(page)
            );
        }
        ScopedOperation::Count { filter } => {
            let cond = render_predicate(filter, shape, &mut q)?;
            q.sql = format!(
                "SELECT COUNT(*) FROM {} WHERE {} AND ({})",
                shape.table, tenant_term, cond
            );
        }
        ScopedOperation::Insert { values } => {
            let mut cols = vec![tenant_col.quoted()];
            let mut placeholders = vec![format!("${}::{}", tenant_param, tenant_type)];
            for (col, v) in values {
                if col.as_str() == TENANT_COLUMN {
                    continue;
                }
                placeholders.push(shape.placeholder(&mut q, col, v.clone())?);
                cols.push(col.quoted());
            }
            q.sql = format!(
                "INSERT INTO {t} AS {a} ({cols}) VALUES ({vals}) RETURNING to_jsonb({a})",
                t = shape.table,
                a = ROW_ALIAS,
                cols = cols.join(", "),
                vals = placeholders.join(", ")
            );
        }
        ScopedOperation::Update { filter, values } => {
            let mut sets = Vec::new();
            for (col, v) in values {
                if col.as_str() == TENANT_COLUMN || col.as_str() == ID_COLUMN {
                    continue;
                }
                let ph = shape.placeholder(&mut q, col, v.clone())?;
                sets.push(format!("{} = {}", col.quoted(), ph));
            }
            if sets.is_empty() {
                return Err(TenancyError::Validation("update has no assignable columns".into()));
            }
            let touched = values.iter().any(|(c, _)| c.as_str() == "updated_at");
            if shape.has_column("updated_at") && !touched {
                sets.push("\"updated_at\" = NOW()".to_string());
            }
            let cond = render_predicate(filter, shape, &mut q)?;
            q.sql = format!(
                "UPDATE {t} AS {a} SET {sets} WHERE {tenant} AND ({cond}) RETURNING to_jsonb({a})",
                t = shape.table,
                a = ROW_ALIAS,
                sets = sets.join(", "),
                tenant = tenant_term,
                cond = cond
            );
        }
        ScopedOperation::Delete { filter } => {
            let cond = render_predicate(filter, shape, &mut q)?;
            q.sql = format!(
                "DELETE FROM {t} AS {a} WHERE {tenant} AND ({cond}) RETURNING to_jsonb({a})",
                t = shape.table,
                a = ROW_ALIAS,
                tenant = tenant_term,
                cond = cond
            );
        }
    }
    Ok(q)
}

fn order_clause(shape: &TableShape) -> String {
    let mut keys = Vec::new();
    if shape.has_column("created_at") {
        keys.push("\"created_at\"");
    }
    if shape.has_column(ID_COLUMN) {
        keys.push("\"id\"");
    }
    if keys.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", keys.join(", "))
    }
}

fn window_clause(page: &Page) -> String {
    format!(" LIMIT {} OFFSET {}", page.effective_limit(), page.offset)
}

/// Caller predicate as SQL text. Empty AND is TRUE, empty OR and empty IN are FALSE.
pub fn render_predicate(p: &Predicate, shape: &TableShape, q: &mut QueryBuf) -> Result<String, TenancyError> {
    let compare = |q: &mut QueryBuf, col: &Ident, op: &str, v: &Value| -> Result<String, TenancyError> {
        let ph = shape.placeholder(q, col, v.clone())?;
        Ok(format!("{} {} {}", col.quoted(), op, ph))
    };
    Ok(match p {
        Predicate::All => "TRUE".to_string(),
        Predicate::Eq(c, v) => compare(q, c, "=", v)?,
        Predicate::Ne(c, v) => compare(q, c, "<>", v)?,
        Predicate::Lt(c, v) => compare(q, c, "<", v)?,
        Predicate::Gt(c, v) => compare(q, c, ">", v)?,
        Predicate::In(c, values) => {
            if values.is_empty() {
                shape.column_type(c)?;
                "FALSE".to_string()
            } else {
                let phs = values
                    .iter()
                    .map(|v| shape.placeholder(q, c, v.clone()))
                    .collect::<Result<Vec<_>, _>>()?;
                format!("{} IN ({})", c.quoted(), phs.join(", "))
            }
        }
        Predicate::IsNull(c) => {
            shape.column_type(c)?;
            format!("{} IS NULL", c.quoted())
        }
        Predicate::IsNotNull(c) => {
            shape.column_type(c)?;
            format!("{} IS NOT NULL", c.quoted())
        }
        Predicate::And(terms) => join_terms(terms, " AND ", "TRUE", shape, q)?,
        Predicate::Or(terms) => join_terms(terms, " OR ", "FALSE", shape, q)?,
        Predicate::Not(inner) => format!("NOT ({})", render_predicate(inner, shape, q)?),
    })
}

fn join_terms(
    terms: &[Predicate],
    sep: &str,
    empty: &str,
    shape: &TableShape,
    q: &mut QueryBuf,
) -> Result<String, TenancyError> {
    if terms.is_empty() {
        return Ok(empty.to_string());
    }
    let parts = terms
        .iter()
        .map(|t| render_predicate(t, shape, q).map(|s| format!("({})", s)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(sep))
}

/// Cross-tenant join of child rows to the parent they reference, keeping tenant mismatches.
pub fn ownership_audit(link: &OwnershipLink, child_table: &str, parent_table: &str) -> String {
    format!(
        "SELECT to_jsonb(c.\"id\"), to_jsonb(c.\"tenant_id\"), to_jsonb(p.\"id\"), to_jsonb(p.\"tenant_id\") \
         FROM {} c JOIN {} p ON p.\"id\" = c.{} \
         WHERE c.\"tenant_id\" IS DISTINCT FROM p.\"tenant_id\" ORDER BY c.\"id\"",
        child_table,
        parent_table,
        link.foreign_key.quoted()
    )
}
