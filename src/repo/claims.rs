//! Claim repository. Mutual exclusion rests entirely on the partial unique
//! index over `(task_id) WHERE status = 'active'`: the losing writer gets a
//! constraint violation, never a torn state.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::errors::{TxError, TxResult};
use crate::model::worker::Claim;
use crate::storage::{begin_immediate, ms_to_datetime, now_ms};

use super::parse_enum;

#[derive(Clone)]
pub struct ClaimRepo {
    pool: SqlitePool,
}

impl ClaimRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Atomically grant `worker_id` the exclusive lease on `task_id` and
    /// mark the worker busy. A concurrent holder surfaces as
    /// `AlreadyClaimed`.
    pub async fn acquire(&self, task_id: &str, worker_id: &str) -> TxResult<Claim> {
        let mut tx = begin_immediate(&self.pool).await?;
        let now = now_ms();
        let result = sqlx::query(
            "INSERT INTO claims (task_id, worker_id, status, claimed_at) VALUES (?, ?, 'active', ?)",
        )
        .bind(task_id)
        .bind(worker_id)
        .bind(now)
        .execute(&mut *tx)
        .await;
        let claim_id = match result {
            Ok(res) => res.last_insert_rowid(),
            Err(sqlx::Error::Database(db))
                if db.kind() == sqlx::error::ErrorKind::UniqueViolation =>
            {
                return Err(TxError::AlreadyClaimed(task_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        sqlx::query("UPDATE workers SET status = 'busy', current_task_id = ? WHERE id = ?")
            .bind(task_id)
            .bind(worker_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Claim {
            id: claim_id,
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            status: crate::model::worker::ClaimStatus::Active,
            claimed_at: ms_to_datetime(now),
            released_at: None,
        })
    }

    /// Release the active claim on a task, if any. Idempotent: releasing a
    /// task with no active claim is a no-op. Returns the releasing worker's
    /// id when a claim was actually released.
    pub async fn release_task(&self, task_id: &str) -> TxResult<Option<String>> {
        let mut tx = begin_immediate(&self.pool).await?;
        let now = now_ms();
        let holder: Option<String> = sqlx::query(
            "SELECT worker_id FROM claims WHERE task_id = ? AND status = 'active'",
        )
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| r.try_get("worker_id"))
        .transpose()?;
        let Some(worker_id) = holder else {
            tx.commit().await?;
            return Ok(None);
        };
        sqlx::query(
            "UPDATE claims SET status = 'released', released_at = ? WHERE task_id = ? AND status = 'active'",
        )
        .bind(now)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"UPDATE workers SET current_task_id = NULL,
                   status = CASE WHEN status = 'busy' THEN 'idle' ELSE status END
               WHERE id = ? AND current_task_id = ?"#,
        )
        .bind(&worker_id)
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(worker_id))
    }

    /// Release every active claim a worker holds; used on deregistration
    /// and by the watchdog after `mark_dead`.
    pub async fn release_by_worker(&self, worker_id: &str) -> TxResult<u64> {
        let mut tx = begin_immediate(&self.pool).await?;
        let released = sqlx::query(
            "UPDATE claims SET status = 'released', released_at = ? WHERE worker_id = ? AND status = 'active'",
        )
        .bind(now_ms())
        .bind(worker_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query(
            r#"UPDATE workers SET current_task_id = NULL,
                   status = CASE WHEN status = 'busy' THEN 'idle' ELSE status END
               WHERE id = ?"#,
        )
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(released)
    }

    pub async fn active_for_task(&self, task_id: &str) -> TxResult<Option<Claim>> {
        let row = sqlx::query("SELECT * FROM claims WHERE task_id = ? AND status = 'active'")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(claim_from_row).transpose()
    }

    pub async fn active_for_worker(&self, worker_id: &str) -> TxResult<Vec<Claim>> {
        let rows = sqlx::query(
            "SELECT * FROM claims WHERE worker_id = ? AND status = 'active' ORDER BY claimed_at",
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(claim_from_row).collect()
    }
}

pub(crate) fn claim_from_row(row: &SqliteRow) -> TxResult<Claim> {
    let status: String = row.try_get("status")?;
    Ok(Claim {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        worker_id: row.try_get("worker_id")?,
        status: parse_enum(&status)?,
        claimed_at: ms_to_datetime(row.try_get("claimed_at")?),
        released_at: row
            .try_get::<Option<i64>, _>("released_at")?
            .map(ms_to_datetime),
    })
}
