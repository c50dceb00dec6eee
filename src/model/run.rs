//! Run tracking: one row per attempt by an agent at a task.
//!
//! Runs heartbeat by bumping byte counters and `last_activity_at` /
//! `last_check_at`. The reaper watches both timestamps; a run that goes
//! quiet on either axis is terminated and marked `reaped`.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Reaped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Reaped => "reaped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "reaped" => Ok(RunStatus::Reaped),
            _ => Err(format!("Invalid run status: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub agent: String,
    pub task_id: Option<String>,
    pub pid: Option<i64>,
    pub transcript_path: Option<String>,
    pub stdout_bytes: i64,
    pub stderr_bytes: i64,
    pub transcript_bytes: i64,
    pub last_activity_at: DateTime<Utc>,
    pub last_check_at: DateTime<Utc>,
    pub status: RunStatus,
    pub exit_code: Option<i64>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRun {
    pub agent: String,
    pub task_id: Option<String>,
    pub pid: Option<i64>,
    pub transcript_path: Option<String>,
}

/// Partial update; also used by run heartbeats to bump counters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub pid: Option<i64>,
    pub stdout_bytes: Option<i64>,
    pub stderr_bytes: Option<i64>,
    pub transcript_bytes: Option<i64>,
    pub exit_code: Option<i64>,
    pub summary: Option<String>,
    pub error_message: Option<String>,
}

/// Which staleness predicate fired for a stalled run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StallReason {
    TranscriptIdle,
    HeartbeatLag,
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StallReason::TranscriptIdle => write!(f, "transcript_idle"),
            StallReason::HeartbeatLag => write!(f, "heartbeat_lag"),
        }
    }
}

/// A running run that tripped a staleness threshold.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalledRun {
    #[serde(flatten)]
    pub run: Run,
    pub reason: StallReason,
    /// Seconds past the last observed activity/check.
    pub lag_secs: i64,
}

/// Outcome of one reap attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapOutcome {
    pub id: String,
    pub reason: StallReason,
    pub process_terminated: bool,
    pub task_reset: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Reaped,
        ] {
            assert_eq!(s.as_str().parse::<RunStatus>().unwrap(), s);
        }
        assert!(RunStatus::Reaped.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
