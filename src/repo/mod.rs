//! Typed CRUD repositories, one per entity. All SQL lives here, including
//! the recursive graph traversals; services above this layer never touch
//! raw rows.

use std::str::FromStr;

use crate::errors::{TxError, TxResult};

pub mod anchors;
pub mod claims;
pub mod deps;
pub mod edges;
pub mod invalidations;
pub mod learnings;
pub mod runs;
pub mod tasks;
pub mod workers;

/// Parse a stored enum column, surfacing corruption as a validation error.
pub(crate) fn parse_enum<T>(raw: &str) -> TxResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(TxError::Validation)
}

/// Escape `%`, `_`, and the escape character itself for a `LIKE ? ESCAPE '\'`
/// predicate.
pub(crate) fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
