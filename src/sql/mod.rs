//! Safe SQL: validated identifiers, values only as parameters.

mod builder;
mod ident;
pub mod params;

pub use builder::{ownership_audit, render, render_predicate, QueryBuf, TableShape};
pub use ident::{qualified, Ident};
pub use params::PgBindValue;
