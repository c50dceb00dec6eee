//! Anchors attach learnings to source-code locations and track whether
//! those locations still exist after refactoring.
//!
//! # Lifecycle
//!
//! An anchor starts `valid`. Verification re-checks the location and either
//! confirms it, self-heals it (hash anchors whose new content is close
//! enough to the stored preview), marks it `drifted`, or marks it
//! `invalid`. Every status change appends one row to the invalidation log.
//! Pinned anchors never transition automatically.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{TxError, TxResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnchorType {
    Glob,
    Hash,
    Symbol,
    LineRange,
}

impl AnchorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorType::Glob => "glob",
            AnchorType::Hash => "hash",
            AnchorType::Symbol => "symbol",
            AnchorType::LineRange => "line_range",
        }
    }
}

impl fmt::Display for AnchorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnchorType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "glob" => Ok(AnchorType::Glob),
            "hash" => Ok(AnchorType::Hash),
            "symbol" => Ok(AnchorType::Symbol),
            "line_range" => Ok(AnchorType::LineRange),
            _ => Err(format!("Invalid anchor type: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    Valid,
    Drifted,
    Invalid,
}

impl AnchorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorStatus::Valid => "valid",
            AnchorStatus::Drifted => "drifted",
            AnchorStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnchorStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "valid" => Ok(AnchorStatus::Valid),
            "drifted" => Ok(AnchorStatus::Drifted),
            "invalid" => Ok(AnchorStatus::Invalid),
            _ => Err(format!("Invalid anchor status: {}", value)),
        }
    }
}

/// What triggered a status change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectedBy {
    Periodic,
    Lazy,
    Manual,
    Agent,
    GitHook,
}

impl DetectedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectedBy::Periodic => "periodic",
            DetectedBy::Lazy => "lazy",
            DetectedBy::Manual => "manual",
            DetectedBy::Agent => "agent",
            DetectedBy::GitHook => "git_hook",
        }
    }
}

impl fmt::Display for DetectedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetectedBy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "periodic" => Ok(DetectedBy::Periodic),
            "lazy" => Ok(DetectedBy::Lazy),
            "manual" => Ok(DetectedBy::Manual),
            "agent" => Ok(DetectedBy::Agent),
            "git_hook" => Ok(DetectedBy::GitHook),
            _ => Err(format!("Invalid detection source: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    pub id: i64,
    pub learning_id: i64,
    pub anchor_type: AnchorType,
    pub file_path: String,
    pub anchor_value: String,
    pub content_hash: Option<String>,
    /// First ~500 chars of the anchored region, kept for self-healing.
    pub content_preview: Option<String>,
    pub symbol_name: Option<String>,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
    pub status: AnchorStatus,
    pub pinned: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Anchor {
    /// Stale when never verified or verified longer than `ttl_secs` ago.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl_secs: u64) -> bool {
        match self.verified_at {
            None => true,
            Some(at) => (now - at).num_seconds() >= ttl_secs as i64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnchor {
    pub learning_id: i64,
    pub anchor_type: AnchorType,
    pub file_path: String,
    /// Type-specific payload: the glob pattern, the hashed region
    /// descriptor, the symbol name, or "start-end".
    pub anchor_value: String,
    pub content_hash: Option<String>,
    pub content_preview: Option<String>,
    pub symbol_name: Option<String>,
    pub line_start: Option<i64>,
    pub line_end: Option<i64>,
    #[serde(default)]
    pub pinned: bool,
}

impl NewAnchor {
    pub fn validate(&self) -> TxResult<()> {
        if self.file_path.trim().is_empty() {
            return Err(TxError::Validation("file path must not be empty".to_string()));
        }
        match self.anchor_type {
            AnchorType::Symbol => {
                if self
                    .symbol_name
                    .as_deref()
                    .unwrap_or(&self.anchor_value)
                    .trim()
                    .is_empty()
                {
                    return Err(TxError::Validation("symbol name must not be empty".to_string()));
                }
            }
            AnchorType::LineRange => {
                let (Some(start), Some(end)) = (self.line_start, self.line_end) else {
                    return Err(TxError::Validation(
                        "line_range anchors need lineStart and lineEnd".to_string(),
                    ));
                };
                if start < 1 || end < start {
                    return Err(TxError::Validation(format!(
                        "invalid line range {start}-{end}"
                    )));
                }
            }
            AnchorType::Glob | AnchorType::Hash => {}
        }
        Ok(())
    }
}

/// One row of the append-only invalidation log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationRecord {
    pub id: i64,
    pub anchor_id: i64,
    pub old_status: AnchorStatus,
    pub new_status: AnchorStatus,
    pub reason: String,
    pub detected_by: DetectedBy,
    pub old_content_hash: Option<String>,
    pub new_content_hash: Option<String>,
    pub similarity_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_roundtrips() {
        for t in [
            AnchorType::Glob,
            AnchorType::Hash,
            AnchorType::Symbol,
            AnchorType::LineRange,
        ] {
            assert_eq!(t.as_str().parse::<AnchorType>().unwrap(), t);
        }
        for s in [AnchorStatus::Valid, AnchorStatus::Drifted, AnchorStatus::Invalid] {
            assert_eq!(s.as_str().parse::<AnchorStatus>().unwrap(), s);
        }
        for d in [
            DetectedBy::Periodic,
            DetectedBy::Lazy,
            DetectedBy::Manual,
            DetectedBy::Agent,
            DetectedBy::GitHook,
        ] {
            assert_eq!(d.as_str().parse::<DetectedBy>().unwrap(), d);
        }
    }

    #[test]
    fn test_line_range_validation() {
        let mut a = NewAnchor {
            learning_id: 1,
            anchor_type: AnchorType::LineRange,
            file_path: "src/lib.rs".to_string(),
            anchor_value: "3-9".to_string(),
            content_hash: None,
            content_preview: None,
            symbol_name: None,
            line_start: Some(3),
            line_end: Some(9),
            pinned: false,
        };
        assert!(a.validate().is_ok());

        a.line_start = Some(0);
        assert!(a.validate().is_err());

        a.line_start = Some(9);
        a.line_end = Some(3);
        assert!(a.validate().is_err());
    }
}
