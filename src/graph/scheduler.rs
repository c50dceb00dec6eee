//! Ready scheduler: derive the priority-ordered workable frontier.
//!
//! Ordering is `score DESC, id ASC`. The deterministic id-ascending
//! tie-break keeps picks stable across calls so agents do not oscillate
//! between equally scored tasks.

use sqlx::SqlitePool;

use crate::errors::TxResult;
use crate::model::task::{Task, TaskStatus, TaskWithDeps};
use crate::repo::{deps::DepRepo, tasks::TaskRepo};

use super::with_deps;

#[derive(Clone)]
pub struct ReadyScheduler {
    tasks: TaskRepo,
    deps: DepRepo,
}

impl ReadyScheduler {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            tasks: TaskRepo::new(pool.clone()),
            deps: DepRepo::new(pool),
        }
    }

    /// The highest-scored workable tasks whose every blocker is done.
    /// `exclude_claimed` (the orchestrator default) additionally skips
    /// tasks held under an active claim.
    pub async fn get_ready(&self, limit: i64, exclude_claimed: bool) -> TxResult<Vec<TaskWithDeps>> {
        let limit = limit.clamp(1, 200);
        let ready = self.tasks.ready(limit, exclude_claimed).await?;
        let mut out = Vec::with_capacity(ready.len());
        for task in ready {
            out.push(with_deps(&self.tasks, &self.deps, task).await?);
        }
        Ok(out)
    }

    /// Tasks that `id` blocks; consulted after a completion to find the
    /// newly-ready frontier.
    pub async fn get_blocking(&self, id: &str) -> TxResult<Vec<Task>> {
        let mut out = Vec::new();
        for blocked in self.deps.blocked_by(id).await? {
            if let Some(task) = self.tasks.get(&blocked).await? {
                out.push(task);
            }
        }
        out.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Single-task readiness: workable status and every blocker done.
    pub async fn is_ready(&self, id: &str) -> TxResult<bool> {
        let task = self.tasks.require(id).await?;
        if !task.status.is_workable() {
            return Ok(false);
        }
        let blockers = self.tasks.blocker_statuses(id).await?;
        Ok(blockers.iter().all(|(_, s)| *s == TaskStatus::Done))
    }
}
