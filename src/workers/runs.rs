//! Run tracking service: one row per execution attempt, heartbeated by the
//! dispatching orchestrator.

use sqlx::SqlitePool;

use crate::errors::{TxError, TxResult};
use crate::ids;
use crate::model::cursor::{Cursor, Page};
use crate::model::run::{NewRun, Run, RunPatch, RunStatus};
use crate::model::task::validate_task_id;
use crate::repo::runs::{RunListFilter, RunRepo};
use crate::repo::tasks::TaskRepo;
use crate::storage::{datetime_to_ms, ms_to_datetime, now_ms};

#[derive(Clone)]
pub struct RunService {
    runs: RunRepo,
    tasks: TaskRepo,
}

impl RunService {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            runs: RunRepo::new(pool.clone()),
            tasks: TaskRepo::new(pool),
        }
    }

    pub fn repo(&self) -> &RunRepo {
        &self.runs
    }

    pub async fn create(&self, new: NewRun) -> TxResult<Run> {
        if new.agent.trim().is_empty() {
            return Err(TxError::Validation("agent must not be empty".to_string()));
        }
        if let Some(task_id) = &new.task_id {
            validate_task_id(task_id)?;
            if !self.tasks.exists(task_id).await? {
                return Err(TxError::NotFound("task", task_id.clone()));
            }
        }
        let now = ms_to_datetime(now_ms());
        let run = Run {
            id: ids::new_run_id(),
            agent: new.agent,
            task_id: new.task_id,
            pid: new.pid,
            transcript_path: new.transcript_path,
            stdout_bytes: 0,
            stderr_bytes: 0,
            transcript_bytes: 0,
            last_activity_at: now,
            last_check_at: now,
            status: RunStatus::Running,
            exit_code: None,
            summary: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.runs.insert(&run).await?;
        Ok(run)
    }

    pub async fn get(&self, id: &str) -> TxResult<Run> {
        if !ids::is_valid_run_id(id) {
            return Err(TxError::Validation(format!("invalid run id: {id}")));
        }
        self.runs.require(id).await
    }

    pub async fn list(
        &self,
        agent: Option<String>,
        status: Option<RunStatus>,
        task_id: Option<String>,
        cursor: Option<String>,
        limit: i64,
    ) -> TxResult<Page<Run>> {
        let cursor = cursor.as_deref().map(Cursor::parse).transpose()?;
        let limit = limit.clamp(1, 500);
        let filter = RunListFilter {
            agent,
            status,
            task_id,
            cursor,
            limit: limit + 1,
        };
        let (mut items, total) = self.runs.list(&filter).await?;
        let has_more = items.len() as i64 > limit;
        items.truncate(limit as usize);
        let next_cursor = if has_more {
            items
                .last()
                .map(|r| Cursor::new(datetime_to_ms(r.created_at), r.id.clone()).encode())
        } else {
            None
        };
        Ok(Page {
            items,
            next_cursor,
            has_more,
            total,
        })
    }

    /// Apply a partial update. Terminal runs only accept counter and
    /// message touches, never a status change.
    pub async fn update(&self, id: &str, patch: RunPatch) -> TxResult<Run> {
        let mut run = self.get(id).await?;
        if let Some(next) = patch.status {
            if run.status.is_terminal() && next != run.status {
                return Err(TxError::IllegalTransition {
                    from: run.status.to_string(),
                    to: next.to_string(),
                });
            }
            run.status = next;
        }
        if let Some(pid) = patch.pid {
            run.pid = Some(pid);
        }
        if let Some(b) = patch.stdout_bytes {
            run.stdout_bytes = b;
        }
        if let Some(b) = patch.stderr_bytes {
            run.stderr_bytes = b;
        }
        if let Some(b) = patch.transcript_bytes {
            run.transcript_bytes = b;
        }
        if let Some(code) = patch.exit_code {
            run.exit_code = Some(code);
        }
        if let Some(summary) = patch.summary {
            run.summary = Some(summary);
        }
        if let Some(err) = patch.error_message {
            run.error_message = Some(err);
        }
        run.updated_at = ms_to_datetime(now_ms());
        self.runs.update(&run).await?;
        Ok(run)
    }

    /// Heartbeat with fresh byte counters; activity only advances when a
    /// counter grew.
    pub async fn heartbeat(
        &self,
        id: &str,
        stdout_bytes: i64,
        stderr_bytes: i64,
        transcript_bytes: i64,
    ) -> TxResult<Run> {
        if !ids::is_valid_run_id(id) {
            return Err(TxError::Validation(format!("invalid run id: {id}")));
        }
        self.runs
            .heartbeat(id, now_ms(), stdout_bytes, stderr_bytes, transcript_bytes)
            .await?;
        self.runs.require(id).await
    }
}
