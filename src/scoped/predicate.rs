//! Caller-side filters: a closed predicate tree over validated columns, plus paging.

use crate::error::TenancyError;
use crate::sql::Ident;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored row, keyed by column name.
pub type Row = Map<String, Value>;

/// Column values for insert/update.
pub type Fields = Map<String, Value>;

/// Filter over columns. Values are always bound as parameters; comparisons
/// against NULL follow SQL three-valued logic (never true).
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    All,
    Eq(Ident, Value),
    Ne(Ident, Value),
    Lt(Ident, Value),
    Gt(Ident, Value),
    In(Ident, Vec<Value>),
    IsNull(Ident),
    IsNotNull(Ident),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: &str, value: impl Into<Value>) -> Result<Self, TenancyError> {
        Ok(Predicate::Eq(Ident::new(column)?, value.into()))
    }

    pub fn ne(column: &str, value: impl Into<Value>) -> Result<Self, TenancyError> {
        Ok(Predicate::Ne(Ident::new(column)?, value.into()))
    }

    pub fn lt(column: &str, value: impl Into<Value>) -> Result<Self, TenancyError> {
        Ok(Predicate::Lt(Ident::new(column)?, value.into()))
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Result<Self, TenancyError> {
        Ok(Predicate::Gt(Ident::new(column)?, value.into()))
    }

    pub fn is_in<I, V>(column: &str, values: I) -> Result<Self, TenancyError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Ok(Predicate::In(Ident::new(column)?, values.into_iter().map(Into::into).collect()))
    }

    pub fn is_null(column: &str) -> Result<Self, TenancyError> {
        Ok(Predicate::IsNull(Ident::new(column)?))
    }

    pub fn is_not_null(column: &str) -> Result<Self, TenancyError> {
        Ok(Predicate::IsNotNull(Ident::new(column)?))
    }

    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::All => other,
            Predicate::And(mut terms) => {
                terms.push(other);
                Predicate::And(terms)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Predicate {
        match self {
            Predicate::Or(mut terms) => {
                terms.push(other);
                Predicate::Or(terms)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Every column this predicate mentions, in order of appearance.
    pub fn columns(&self) -> Vec<&Ident> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a Ident>) {
        match self {
            Predicate::All => {}
            Predicate::Eq(c, _)
            | Predicate::Ne(c, _)
            | Predicate::Lt(c, _)
            | Predicate::Gt(c, _)
            | Predicate::In(c, _)
            | Predicate::IsNull(c)
            | Predicate::IsNotNull(c) => out.push(c),
            Predicate::And(terms) | Predicate::Or(terms) => {
                for t in terms {
                    t.collect_columns(out);
                }
            }
            Predicate::Not(inner) => inner.collect_columns(out),
        }
    }

    /// In-process evaluation. `None` is SQL's UNKNOWN.
    pub fn evaluate(&self, row: &Row) -> Option<bool> {
        let cell = |c: &Ident| row.get(c.as_str()).filter(|v| !v.is_null());
        match self {
            Predicate::All => Some(true),
            Predicate::Eq(c, v) => compare(cell(c)?, v).map(|o| o == Ordering::Equal),
            Predicate::Ne(c, v) => compare(cell(c)?, v).map(|o| o != Ordering::Equal),
            Predicate::Lt(c, v) => compare(cell(c)?, v).map(|o| o == Ordering::Less),
            Predicate::Gt(c, v) => compare(cell(c)?, v).map(|o| o == Ordering::Greater),
            Predicate::In(c, values) => {
                let current = cell(c)?;
                let mut unknown = false;
                for v in values {
                    match compare(current, v) {
                        Some(Ordering::Equal) => return Some(true),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(false)
                }
            }
            Predicate::IsNull(c) => Some(cell(c).is_none()),
            Predicate::IsNotNull(c) => Some(cell(c).is_some()),
            Predicate::And(terms) => {
                let mut result = Some(true);
                for t in terms {
                    match t.evaluate(row) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or(terms) => {
                let mut result = Some(false);
                for t in terms {
                    match t.evaluate(row) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Predicate::Not(inner) => inner.evaluate(row).map(|b| !b),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.evaluate(row) == Some(true)
    }
}

/// Ordering between a stored cell and a filter value. NULL or mismatched kinds compare as unknown.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, _) | (_, Value::Null) => None,
        (x, y) if x == y => Some(Ordering::Equal),
        _ => None,
    }
}

/// Page window. Limit defaults to 100 and is capped at 1000.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Page {
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// `limit` with the cap applied, for pages built by hand.
    pub fn effective_limit(&self) -> u32 {
        self.limit.min(Self::MAX_LIMIT)
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::new(None, None)
    }
}
