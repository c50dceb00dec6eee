//! Worker registry repository.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::errors::{TxError, TxResult};
use crate::model::worker::{Worker, WorkerStatus};
use crate::storage::{datetime_to_ms, ms_to_datetime};

use super::parse_enum;

#[derive(Clone)]
pub struct WorkerRepo {
    pool: SqlitePool,
}

impl WorkerRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, worker: &Worker) -> TxResult<()> {
        sqlx::query(
            r#"INSERT INTO workers (id, hostname, pid, capabilities, status,
               registered_at, last_heartbeat_at, current_task_id, metadata)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&worker.id)
        .bind(&worker.hostname)
        .bind(worker.pid)
        .bind(serde_json::to_string(&worker.capabilities)?)
        .bind(worker.status.as_str())
        .bind(datetime_to_ms(worker.registered_at))
        .bind(datetime_to_ms(worker.last_heartbeat_at))
        .bind(&worker.current_task_id)
        .bind(serde_json::to_string(&worker.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> TxResult<Option<Worker>> {
        let row = sqlx::query("SELECT * FROM workers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(worker_from_row).transpose()
    }

    pub async fn require(&self, id: &str) -> TxResult<Worker> {
        self.get(id)
            .await?
            .ok_or_else(|| TxError::NotFound("worker", id.to_string()))
    }

    pub async fn list(&self) -> TxResult<Vec<Worker>> {
        let rows = sqlx::query("SELECT * FROM workers ORDER BY registered_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(worker_from_row).collect()
    }

    pub async fn count_alive(&self) -> TxResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM workers WHERE status <> 'dead'")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// Overwrite heartbeat state in one statement. The metrics payload, when
    /// present, lands under `metadata.lastMetrics`; an omitted current task
    /// leaves the stored value untouched.
    pub async fn heartbeat(
        &self,
        id: &str,
        now_ms: i64,
        status: WorkerStatus,
        current_task_id: Option<&str>,
        metrics: Option<&serde_json::Value>,
    ) -> TxResult<()> {
        let metrics_json = metrics.map(serde_json::to_string).transpose()?;
        let affected = sqlx::query(
            r#"UPDATE workers SET
                   last_heartbeat_at = ?1,
                   status = ?2,
                   current_task_id = COALESCE(?3, current_task_id),
                   metadata = CASE WHEN ?4 IS NULL THEN metadata
                                   ELSE json_set(metadata, '$.lastMetrics', json(?4)) END
               WHERE id = ?5"#,
        )
        .bind(now_ms)
        .bind(status.as_str())
        .bind(current_task_id)
        .bind(metrics_json)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(TxError::NotFound("worker", id.to_string()));
        }
        Ok(())
    }

    pub async fn set_status(&self, id: &str, status: WorkerStatus) -> TxResult<()> {
        let affected = sqlx::query("UPDATE workers SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(TxError::NotFound("worker", id.to_string()));
        }
        Ok(())
    }

    /// Workers whose heartbeat is older than the cutoff, excluding those
    /// already dead or on their way down.
    pub async fn find_dead(&self, cutoff_ms: i64) -> TxResult<Vec<Worker>> {
        let rows = sqlx::query(
            r#"SELECT * FROM workers
               WHERE last_heartbeat_at < ?
                 AND status NOT IN ('dead', 'stopping')
               ORDER BY last_heartbeat_at ASC"#,
        )
        .bind(cutoff_ms)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(worker_from_row).collect()
    }
}

pub(crate) fn worker_from_row(row: &SqliteRow) -> TxResult<Worker> {
    let status: String = row.try_get("status")?;
    let capabilities: String = row.try_get("capabilities")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(Worker {
        id: row.try_get("id")?,
        hostname: row.try_get("hostname")?,
        pid: row.try_get("pid")?,
        capabilities: serde_json::from_str(&capabilities)?,
        status: parse_enum(&status)?,
        registered_at: ms_to_datetime(row.try_get("registered_at")?),
        last_heartbeat_at: ms_to_datetime(row.try_get("last_heartbeat_at")?),
        current_task_id: row.try_get("current_task_id")?,
        metadata: serde_json::from_str(&metadata)?,
    })
}
