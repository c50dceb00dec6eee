//! Task definition and lifecycle.
//!
//! A `Task` is a unit of work an agent or a human can pick up. Tasks form
//! two graphs at once: a parent/child hierarchy (bounded depth) and a
//! directed acyclic blocker graph. A task is *workable* while it sits in
//! one of the pre-execution statuses; it is *ready* when it is workable and
//! every blocker is done.
//!
//! # Lifecycle
//!
//! Status moves follow a fixed transition table (see [`TaskStatus::can_transition`]).
//! Reaching `done` stamps `completed_at`; the only way out of `done` is an
//! explicit reopen back to `active`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{TxError, TxResult};
use crate::ids;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Captured but not yet groomed.
    Backlog,
    /// Groomed and eligible for pickup.
    Ready,
    /// An agent is deciding how to approach it.
    Planning,
    /// Work in progress.
    Active,
    /// Waiting on something outside the blocker graph.
    Blocked,
    /// Finished work awaiting automated review.
    Review,
    /// Finished work awaiting a human.
    HumanNeedsToReview,
    /// Completed and verified.
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Ready => "ready",
            TaskStatus::Planning => "planning",
            TaskStatus::Active => "active",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Review => "review",
            TaskStatus::HumanNeedsToReview => "human_needs_to_review",
            TaskStatus::Done => "done",
        }
    }

    /// Statuses from which a task can be picked up by the scheduler.
    pub fn is_workable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Backlog | TaskStatus::Ready | TaskStatus::Planning
        )
    }

    /// Whether moving from `self` to `to` is a legal lifecycle step.
    /// Same-status moves are treated as no-ops and always allowed.
    pub fn can_transition(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if *self == to {
            return true;
        }
        match self {
            Backlog => matches!(to, Ready | Planning | Active | Blocked | Done),
            Ready => matches!(to, Planning | Active | Blocked | Done | Backlog),
            Planning => matches!(to, Active | Blocked | Review | Done | Backlog),
            Active => matches!(to, Blocked | Review | HumanNeedsToReview | Done | Backlog),
            Blocked => matches!(to, Ready | Active | Done | Backlog),
            Review => matches!(to, Active | HumanNeedsToReview | Done | Backlog),
            HumanNeedsToReview => matches!(to, Active | Done | Backlog),
            Done => matches!(to, Active),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "backlog" => Ok(TaskStatus::Backlog),
            "ready" => Ok(TaskStatus::Ready),
            "planning" => Ok(TaskStatus::Planning),
            "active" => Ok(TaskStatus::Active),
            "blocked" => Ok(TaskStatus::Blocked),
            "review" => Ok(TaskStatus::Review),
            "human_needs_to_review" => Ok(TaskStatus::HumanNeedsToReview),
            "done" => Ok(TaskStatus::Done),
            _ => Err(format!("Invalid task status: {}", value)),
        }
    }
}

/// Minimum and maximum priority score.
pub const SCORE_MIN: i64 = 0;
pub const SCORE_MAX: i64 = 1000;
pub const SCORE_DEFAULT: i64 = 500;

/// A persisted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    /// Priority score; higher is more urgent.
    pub score: i64,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: Option<TaskStatus>,
    pub score: Option<i64>,
    pub parent_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewTask {
    pub fn validate(&self) -> TxResult<()> {
        if self.title.trim().is_empty() {
            return Err(TxError::Validation("title must not be empty".to_string()));
        }
        if let Some(score) = self.score {
            validate_score(score)?;
        }
        if let Some(parent) = &self.parent_id {
            validate_task_id(parent)?;
        }
        if let Some(meta) = &self.metadata {
            if !meta.is_object() {
                return Err(TxError::Validation("metadata must be an object".to_string()));
            }
        }
        Ok(())
    }
}

/// Partial update for a task. Absent fields are untouched; `parent_id`
/// distinguishes absent from an explicit null (detach).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub score: Option<i64>,
    #[serde(default, deserialize_with = "super::double_option")]
    pub parent_id: Option<Option<String>>,
    pub metadata: Option<serde_json::Value>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.score.is_none()
            && self.parent_id.is_none()
            && self.metadata.is_none()
    }

    pub fn validate(&self) -> TxResult<()> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(TxError::Validation("title must not be empty".to_string()));
            }
        }
        if let Some(score) = self.score {
            validate_score(score)?;
        }
        if let Some(Some(parent)) = &self.parent_id {
            validate_task_id(parent)?;
        }
        if let Some(meta) = &self.metadata {
            if !meta.is_object() {
                return Err(TxError::Validation("metadata must be an object".to_string()));
            }
        }
        Ok(())
    }
}

/// A task together with its computed dependency view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWithDeps {
    #[serde(flatten)]
    pub task: Task,
    /// Ids of tasks that must be done before this one.
    pub blockers: Vec<String>,
    /// Ids of tasks this one blocks.
    pub blocks: Vec<String>,
    /// Ids of direct children.
    pub children: Vec<String>,
    /// Workable status and every blocker done.
    pub is_ready: bool,
}

/// Node of the in-memory task tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskTreeNode {
    #[serde(flatten)]
    pub task: Task,
    pub children: Vec<TaskTreeNode>,
}

/// Result of completing a task: the updated row plus the tasks the
/// completion just unblocked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub task: Task,
    pub now_ready: Vec<Task>,
}

pub fn validate_score(score: i64) -> TxResult<()> {
    if !(SCORE_MIN..=SCORE_MAX).contains(&score) {
        return Err(TxError::Validation(format!(
            "score must be within {SCORE_MIN}..={SCORE_MAX}, got {score}"
        )));
    }
    Ok(())
}

pub fn validate_task_id(id: &str) -> TxResult<()> {
    if !ids::is_valid_task_id(id) {
        return Err(TxError::Validation(format!("invalid task id: {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        // Spot checks straight from the table.
        assert!(Backlog.can_transition(Done));
        assert!(Ready.can_transition(Backlog));
        assert!(Planning.can_transition(Review));
        assert!(Active.can_transition(HumanNeedsToReview));
        assert!(Blocked.can_transition(Ready));
        assert!(Review.can_transition(HumanNeedsToReview));
        assert!(HumanNeedsToReview.can_transition(Done));
        // Reopen is the only way out of done.
        assert!(Done.can_transition(Active));
        assert!(!Done.can_transition(Ready));
        assert!(!Done.can_transition(Backlog));
        // Illegal moves.
        assert!(!Backlog.can_transition(Review));
        assert!(!Backlog.can_transition(HumanNeedsToReview));
        assert!(!Blocked.can_transition(Review));
        assert!(!Ready.can_transition(HumanNeedsToReview));
        // Self moves are no-ops.
        assert!(Active.can_transition(Active));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TaskStatus::Backlog,
            TaskStatus::Ready,
            TaskStatus::Planning,
            TaskStatus::Active,
            TaskStatus::Blocked,
            TaskStatus::Review,
            TaskStatus::HumanNeedsToReview,
            TaskStatus::Done,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&TaskStatus::HumanNeedsToReview).unwrap();
        assert_eq!(json, "\"human_needs_to_review\"");
    }

    #[test]
    fn test_new_task_validation() {
        let mut t = NewTask {
            title: "Fix flaky test".to_string(),
            ..Default::default()
        };
        assert!(t.validate().is_ok());

        t.title = "   ".to_string();
        assert!(t.validate().is_err());

        t.title = "ok".to_string();
        t.score = Some(1001);
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_patch_parent_null_vs_absent() {
        let absent: TaskPatch = serde_json::from_str(r#"{"title":"t"}"#).unwrap();
        assert!(absent.parent_id.is_none());

        let null: TaskPatch = serde_json::from_str(r#"{"parentId":null}"#).unwrap();
        assert_eq!(null.parent_id, Some(None));

        let set: TaskPatch = serde_json::from_str(r#"{"parentId":"tx-abc123"}"#).unwrap();
        assert_eq!(set.parent_id, Some(Some("tx-abc123".to_string())));
    }
}
