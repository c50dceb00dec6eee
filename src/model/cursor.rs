//! Keyset pagination cursor for task and run listings.
//!
//! A cursor encodes the last row of the previous page as `"<score>:<id>"`
//! and produces the predicate `score < S OR (score = S AND id > I)` for
//! the `(score DESC, id ASC)` ordering.

use serde::Serialize;

use crate::errors::{TxError, TxResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub score: i64,
    pub id: String,
}

impl Cursor {
    pub fn new(score: i64, id: impl Into<String>) -> Self {
        Self {
            score,
            id: id.into(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.score, self.id)
    }

    pub fn parse(raw: &str) -> TxResult<Self> {
        let Some((score, id)) = raw.split_once(':') else {
            return Err(TxError::Validation(format!("invalid cursor: {raw}")));
        };
        let score: i64 = score
            .parse()
            .map_err(|_| TxError::Validation(format!("invalid cursor score: {raw}")))?;
        if id.is_empty() {
            return Err(TxError::Validation(format!("invalid cursor id: {raw}")));
        }
        Ok(Self {
            score,
            id: id.to_string(),
        })
    }
}

/// One page of results plus continuation state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let c = Cursor::new(500, "tx-abc123");
        assert_eq!(c.encode(), "500:tx-abc123");
        assert_eq!(Cursor::parse(&c.encode()).unwrap(), c);
    }

    #[test]
    fn test_negative_score_and_colons_in_id() {
        let c = Cursor::parse("-3:run-a1b2c3d4").unwrap();
        assert_eq!(c.score, -3);
        assert_eq!(c.id, "run-a1b2c3d4");
    }

    #[test]
    fn test_invalid() {
        assert!(Cursor::parse("").is_err());
        assert!(Cursor::parse("500").is_err());
        assert!(Cursor::parse("abc:tx-abc123").is_err());
        assert!(Cursor::parse("500:").is_err());
    }
}
