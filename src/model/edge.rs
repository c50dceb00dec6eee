//! Typed directed edges over the heterogeneous node set (learnings, tasks,
//! anchors, runs). Edges soft-delete: invalidation stamps a timestamp and
//! the row leaves the live view without vanishing.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Learning,
    Task,
    Anchor,
    Run,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Learning => "learning",
            NodeKind::Task => "task",
            NodeKind::Anchor => "anchor",
            NodeKind::Run => "run",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "learning" => Ok(NodeKind::Learning),
            "task" => Ok(NodeKind::Task),
            "anchor" => Ok(NodeKind::Anchor),
            "run" => Ok(NodeKind::Run),
            _ => Err(format!("Invalid node kind: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EdgeType {
    #[serde(rename = "USED_IN_RUN")]
    UsedInRun,
    #[serde(rename = "ANCHORED_AT")]
    AnchoredAt,
    #[serde(rename = "DERIVED_FROM")]
    DerivedFrom,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::UsedInRun => "USED_IN_RUN",
            EdgeType::AnchoredAt => "ANCHORED_AT",
            EdgeType::DerivedFrom => "DERIVED_FROM",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EdgeType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "USED_IN_RUN" => Ok(EdgeType::UsedInRun),
            "ANCHORED_AT" => Ok(EdgeType::AnchoredAt),
            "DERIVED_FROM" => Ok(EdgeType::DerivedFrom),
            _ => Err(format!("Invalid edge type: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: i64,
    pub src_type: NodeKind,
    pub src_id: String,
    pub dst_type: NodeKind,
    pub dst_id: String,
    pub edge_type: EdgeType,
    pub weight: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl Edge {
    pub fn is_live(&self) -> bool {
        self.invalidated_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_type_shouting_case() {
        assert_eq!(
            serde_json::to_string(&EdgeType::UsedInRun).unwrap(),
            "\"USED_IN_RUN\""
        );
        assert_eq!("ANCHORED_AT".parse::<EdgeType>().unwrap(), EdgeType::AnchoredAt);
        assert!("USED".parse::<EdgeType>().is_err());
    }
}
