//! Learnings: textual observations deposited by agents and retrieved as
//! context for similar problems later.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{TxError, TxResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Manual,
    Run,
    File,
    Import,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Manual => "manual",
            SourceType::Run => "run",
            SourceType::File => "file",
            SourceType::Import => "import",
        }
    }
}

impl Default for SourceType {
    fn default() -> Self {
        SourceType::Manual
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manual" => Ok(SourceType::Manual),
            "run" => Ok(SourceType::Run),
            "file" => Ok(SourceType::File),
            "import" => Ok(SourceType::Import),
            _ => Err(format!("Invalid source type: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Learning {
    pub id: i64,
    pub content: String,
    pub source_type: SourceType,
    pub source_ref: Option<String>,
    pub keywords: Vec<String>,
    pub category: Option<String>,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Null means neutral; [0,1] otherwise.
    pub outcome_score: Option<f64>,
    /// Whether a dense vector is stored for this learning.
    pub has_embedding: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLearning {
    pub content: String,
    #[serde(default)]
    pub source_type: SourceType,
    pub source_ref: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub category: Option<String>,
}

impl NewLearning {
    pub fn validate(&self) -> TxResult<()> {
        if self.content.trim().is_empty() {
            return Err(TxError::Validation(
                "learning content must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn validate_outcome_score(score: f64) -> TxResult<()> {
    if !(0.0..=1.0).contains(&score) || !score.is_finite() {
        return Err(TxError::Validation(format!(
            "outcome score must be within [0, 1], got {score}"
        )));
    }
    Ok(())
}

/// A learning annotated with every retrieval signal that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredLearning {
    #[serde(flatten)]
    pub learning: Learning,
    pub relevance_score: f64,
    pub bm25_score: f64,
    pub vector_score: f64,
    pub recency_score: f64,
    pub rrf_score: f64,
    /// Best 1-based rank across lexical lists; 0 when absent.
    pub bm25_rank: usize,
    /// Best 1-based rank across dense lists; 0 when absent.
    pub vector_rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reranker_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_roundtrip() {
        for s in [
            SourceType::Manual,
            SourceType::Run,
            SourceType::File,
            SourceType::Import,
        ] {
            assert_eq!(s.as_str().parse::<SourceType>().unwrap(), s);
        }
        assert_eq!(SourceType::default(), SourceType::Manual);
    }

    #[test]
    fn test_outcome_bounds() {
        assert!(validate_outcome_score(0.0).is_ok());
        assert!(validate_outcome_score(1.0).is_ok());
        assert!(validate_outcome_score(-0.1).is_err());
        assert!(validate_outcome_score(1.1).is_err());
        assert!(validate_outcome_score(f64::NAN).is_err());
    }
}
