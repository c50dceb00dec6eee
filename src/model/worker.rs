//! Worker registry entries and the claim lease they hold.
//!
//! A worker is an agent process that registered with the pool. It ticks a
//! heartbeat at a fixed cadence; missing several in a row marks it dead and
//! releases every claim it held.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Idle,
    Busy,
    Stopping,
    Dead,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Dead => "dead",
        }
    }

    /// Counts toward the pool-size cap.
    pub fn is_alive(&self) -> bool {
        !matches!(self, WorkerStatus::Dead)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "starting" => Ok(WorkerStatus::Starting),
            "idle" => Ok(WorkerStatus::Idle),
            "busy" => Ok(WorkerStatus::Busy),
            "stopping" => Ok(WorkerStatus::Stopping),
            "dead" => Ok(WorkerStatus::Dead),
            _ => Err(format!("Invalid worker status: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: String,
    pub hostname: String,
    pub pid: i64,
    pub capabilities: Vec<String>,
    pub status: WorkerStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub current_task_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Registration request; everything is optional, the registry fills gaps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorker {
    pub id: Option<String>,
    pub hostname: Option<String>,
    pub pid: Option<i64>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Heartbeat payload sent by a worker every interval.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub status: WorkerStatus,
    pub current_task_id: Option<String>,
    pub metrics: Option<serde_json::Value>,
}

/// Claim lease status. A claim only ever moves `active -> released`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Released,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Active => "active",
            ClaimStatus::Released => "released",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(ClaimStatus::Active),
            "released" => Ok(ClaimStatus::Released),
            _ => Err(format!("Invalid claim status: {}", value)),
        }
    }
}

/// An exclusive lease granting a worker the right to work one task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub id: i64,
    pub task_id: String,
    pub worker_id: String,
    pub status: ClaimStatus,
    pub claimed_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}
