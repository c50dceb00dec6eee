//! Claim manager: exclusive-lease issuance and release.
//!
//! Mutual exclusion needs no in-process lock: the partial unique index on
//! active claims arbitrates concurrent acquires, and the loser sees
//! `AlreadyClaimed` and asks the scheduler for its next candidate.

use sqlx::SqlitePool;
use tracing::info;

use crate::errors::{TxError, TxResult};
use crate::ids;
use crate::model::task::validate_task_id;
use crate::model::worker::Claim;
use crate::repo::{claims::ClaimRepo, tasks::TaskRepo, workers::WorkerRepo};

#[derive(Clone)]
pub struct ClaimManager {
    claims: ClaimRepo,
    tasks: TaskRepo,
    workers: WorkerRepo,
}

impl ClaimManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            claims: ClaimRepo::new(pool.clone()),
            tasks: TaskRepo::new(pool.clone()),
            workers: WorkerRepo::new(pool),
        }
    }

    /// Take the exclusive lease on a task for a worker.
    pub async fn acquire(&self, task_id: &str, worker_id: &str) -> TxResult<Claim> {
        validate_task_id(task_id)?;
        if !ids::is_valid_worker_id(worker_id) {
            return Err(TxError::Validation(format!(
                "invalid worker id: {worker_id}"
            )));
        }
        if !self.tasks.exists(task_id).await? {
            return Err(TxError::NotFound("task", task_id.to_string()));
        }
        let worker = self.workers.require(worker_id).await?;
        if !worker.status.is_alive() {
            return Err(TxError::Validation(format!(
                "worker {worker_id} is dead and cannot claim tasks"
            )));
        }
        let claim = self.claims.acquire(task_id, worker_id).await?;
        info!(task_id, worker_id, "claim acquired");
        Ok(claim)
    }

    /// Release the active claim on a task. Idempotent; returns the holder
    /// that was released, if any.
    pub async fn release(&self, task_id: &str) -> TxResult<Option<String>> {
        validate_task_id(task_id)?;
        let released = self.claims.release_task(task_id).await?;
        if let Some(worker_id) = &released {
            info!(task_id, worker_id, "claim released");
        }
        Ok(released)
    }

    /// Release every claim a worker holds (deregistration, reaping).
    pub async fn release_by_worker(&self, worker_id: &str) -> TxResult<u64> {
        let released = self.claims.release_by_worker(worker_id).await?;
        if released > 0 {
            info!(worker_id, released, "released worker claims");
        }
        Ok(released)
    }

    pub async fn active_for_task(&self, task_id: &str) -> TxResult<Option<Claim>> {
        self.claims.active_for_task(task_id).await
    }

    pub async fn active_for_worker(&self, worker_id: &str) -> TxResult<Vec<Claim>> {
        self.claims.active_for_worker(worker_id).await
    }
}
