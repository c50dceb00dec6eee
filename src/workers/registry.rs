//! Worker registry: registration against a bounded pool, heartbeat
//! bookkeeping, and dead-worker detection.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::errors::{TxError, TxResult};
use crate::ids;
use crate::model::worker::{Heartbeat, RegisterWorker, Worker, WorkerStatus};
use crate::repo::{claims::ClaimRepo, workers::WorkerRepo};
use crate::storage::{ms_to_datetime, now_ms};

#[derive(Clone)]
pub struct WorkerRegistry {
    workers: WorkerRepo,
    claims: ClaimRepo,
    config: WorkerConfig,
}

impl WorkerRegistry {
    pub fn new(pool: SqlitePool, config: WorkerConfig) -> Self {
        Self {
            workers: WorkerRepo::new(pool.clone()),
            claims: ClaimRepo::new(pool),
            config,
        }
    }

    /// Register a worker, assigning an id when the caller brought none.
    /// Fails with `PoolAtCapacity` once the alive count hits the cap.
    pub async fn register(&self, req: RegisterWorker) -> TxResult<Worker> {
        let alive = self.workers.count_alive().await? as usize;
        if alive >= self.config.pool_size {
            return Err(TxError::PoolAtCapacity(alive));
        }
        let id = match req.id {
            Some(id) => {
                if !ids::is_valid_worker_id(&id) {
                    return Err(TxError::Validation(format!("invalid worker id: {id}")));
                }
                id
            }
            None => ids::new_worker_id(),
        };
        let now = ms_to_datetime(now_ms());
        let worker = Worker {
            id,
            hostname: req.hostname.unwrap_or_else(|| {
                std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
            }),
            pid: req.pid.unwrap_or(0),
            capabilities: req.capabilities,
            status: WorkerStatus::Starting,
            registered_at: now,
            last_heartbeat_at: now,
            current_task_id: None,
            metadata: serde_json::Value::Object(Default::default()),
        };
        self.workers.insert(&worker).await?;
        info!(worker_id = %worker.id, hostname = %worker.hostname, "registered worker");
        Ok(worker)
    }

    pub async fn get(&self, id: &str) -> TxResult<Worker> {
        self.workers.require(id).await
    }

    pub async fn list(&self) -> TxResult<Vec<Worker>> {
        self.workers.list().await
    }

    /// Record a heartbeat. Fire-and-forget: only the worker row moves.
    pub async fn heartbeat(&self, id: &str, beat: Heartbeat) -> TxResult<()> {
        if let Some(task_id) = &beat.current_task_id {
            crate::model::task::validate_task_id(task_id)?;
        }
        self.workers
            .heartbeat(
                id,
                now_ms(),
                beat.status,
                beat.current_task_id.as_deref(),
                beat.metrics.as_ref(),
            )
            .await
    }

    /// Graceful shutdown path: stop taking work, release every claim, and
    /// leave the registry.
    pub async fn deregister(&self, id: &str) -> TxResult<()> {
        self.workers.set_status(id, WorkerStatus::Stopping).await?;
        let released = self.claims.release_by_worker(id).await?;
        self.workers.set_status(id, WorkerStatus::Dead).await?;
        info!(worker_id = %id, released, "deregistered worker");
        Ok(())
    }

    /// Workers whose heartbeat lapsed past `interval x missed_threshold`,
    /// excluding those already dead or stopping.
    pub async fn find_dead(&self) -> TxResult<Vec<Worker>> {
        let cutoff = now_ms()
            - (self.config.heartbeat_interval_secs * self.config.missed_threshold as u64 * 1000)
                as i64;
        self.workers.find_dead(cutoff).await
    }

    /// Mark one worker dead. The caller follows up with a claim release.
    pub async fn mark_dead(&self, id: &str) -> TxResult<()> {
        self.workers.set_status(id, WorkerStatus::Dead).await
    }

    /// Watchdog sweep: mark every lapsed worker dead and release its
    /// claims. Returns the ids of the workers reaped.
    pub async fn sweep_dead(&self) -> TxResult<Vec<String>> {
        let mut swept = Vec::new();
        for worker in self.find_dead().await? {
            warn!(
                worker_id = %worker.id,
                last_heartbeat = %worker.last_heartbeat_at,
                "worker missed heartbeats, marking dead"
            );
            self.mark_dead(&worker.id).await?;
            let released = self.claims.release_by_worker(&worker.id).await?;
            info!(worker_id = %worker.id, released, "released claims of dead worker");
            swept.push(worker.id);
        }
        Ok(swept)
    }
}
