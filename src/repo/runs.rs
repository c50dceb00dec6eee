//! Run repository, including the staleness scan the reaper feeds on.

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};

use crate::errors::{TxError, TxResult};
use crate::model::cursor::Cursor;
use crate::model::run::{Run, RunStatus, StallReason, StalledRun};
use crate::storage::{datetime_to_ms, ms_to_datetime};

use super::parse_enum;

#[derive(Debug, Clone, Default)]
pub struct RunListFilter {
    pub agent: Option<String>,
    pub status: Option<RunStatus>,
    pub task_id: Option<String>,
    /// Cursor over `(created_at DESC, id ASC)`.
    pub cursor: Option<Cursor>,
    pub limit: i64,
}

#[derive(Clone)]
pub struct RunRepo {
    pool: SqlitePool,
}

impl RunRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, run: &Run) -> TxResult<()> {
        sqlx::query(
            r#"INSERT INTO runs (id, agent, task_id, pid, transcript_path,
               stdout_bytes, stderr_bytes, transcript_bytes,
               last_activity_at, last_check_at, status, exit_code, summary,
               error_message, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&run.id)
        .bind(&run.agent)
        .bind(&run.task_id)
        .bind(run.pid)
        .bind(&run.transcript_path)
        .bind(run.stdout_bytes)
        .bind(run.stderr_bytes)
        .bind(run.transcript_bytes)
        .bind(datetime_to_ms(run.last_activity_at))
        .bind(datetime_to_ms(run.last_check_at))
        .bind(run.status.as_str())
        .bind(run.exit_code)
        .bind(&run.summary)
        .bind(&run.error_message)
        .bind(datetime_to_ms(run.created_at))
        .bind(datetime_to_ms(run.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> TxResult<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    pub async fn require(&self, id: &str) -> TxResult<Run> {
        self.get(id)
            .await?
            .ok_or_else(|| TxError::NotFound("run", id.to_string()))
    }

    pub async fn update(&self, run: &Run) -> TxResult<()> {
        let affected = sqlx::query(
            r#"UPDATE runs SET status = ?, pid = ?, stdout_bytes = ?, stderr_bytes = ?,
               transcript_bytes = ?, last_activity_at = ?, last_check_at = ?,
               exit_code = ?, summary = ?, error_message = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(run.status.as_str())
        .bind(run.pid)
        .bind(run.stdout_bytes)
        .bind(run.stderr_bytes)
        .bind(run.transcript_bytes)
        .bind(datetime_to_ms(run.last_activity_at))
        .bind(datetime_to_ms(run.last_check_at))
        .bind(run.exit_code)
        .bind(&run.summary)
        .bind(&run.error_message)
        .bind(datetime_to_ms(run.updated_at))
        .bind(&run.id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(TxError::NotFound("run", run.id.clone()));
        }
        Ok(())
    }

    /// Heartbeat: `last_check_at` always advances; `last_activity_at` only
    /// advances when a byte counter grew. Counters never go backwards.
    pub async fn heartbeat(
        &self,
        id: &str,
        now_ms: i64,
        stdout_bytes: i64,
        stderr_bytes: i64,
        transcript_bytes: i64,
    ) -> TxResult<()> {
        let affected = sqlx::query(
            r#"UPDATE runs SET
                   last_check_at = ?1,
                   last_activity_at = CASE
                       WHEN ?2 > stdout_bytes OR ?3 > stderr_bytes OR ?4 > transcript_bytes
                       THEN ?1 ELSE last_activity_at END,
                   stdout_bytes = MAX(stdout_bytes, ?2),
                   stderr_bytes = MAX(stderr_bytes, ?3),
                   transcript_bytes = MAX(transcript_bytes, ?4),
                   updated_at = ?1
               WHERE id = ?5"#,
        )
        .bind(now_ms)
        .bind(stdout_bytes)
        .bind(stderr_bytes)
        .bind(transcript_bytes)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(TxError::NotFound("run", id.to_string()));
        }
        Ok(())
    }

    pub async fn list(&self, filter: &RunListFilter) -> TxResult<(Vec<Run>, i64)> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM runs WHERE 1 = 1");
        push_filters(&mut qb, filter);
        if let Some(cursor) = &filter.cursor {
            qb.push(" AND (created_at < ")
                .push_bind(cursor.score)
                .push(" OR (created_at = ")
                .push_bind(cursor.score)
                .push(" AND id > ")
                .push_bind(cursor.id.clone())
                .push("))");
        }
        qb.push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(filter.limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let runs: TxResult<Vec<Run>> = rows.iter().map(run_from_row).collect();

        let mut count_qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM runs WHERE 1 = 1");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.try_get("n")?;

        Ok((runs?, total))
    }

    /// Running runs that tripped either staleness predicate. When both
    /// fire, transcript-idle is reported as the reason.
    pub async fn list_stalled(
        &self,
        now_ms: i64,
        idle_ms: i64,
        lag_ms: i64,
    ) -> TxResult<Vec<StalledRun>> {
        let rows = sqlx::query(
            r#"SELECT * FROM runs
               WHERE status = 'running'
                 AND (last_activity_at <= ?1 - ?2 OR last_check_at <= ?1 - ?3)
               ORDER BY last_activity_at ASC"#,
        )
        .bind(now_ms)
        .bind(idle_ms)
        .bind(lag_ms)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let run = run_from_row(row)?;
                let idle_for = now_ms - datetime_to_ms(run.last_activity_at);
                let (reason, lag) = if idle_for >= idle_ms {
                    (StallReason::TranscriptIdle, idle_for)
                } else {
                    (
                        StallReason::HeartbeatLag,
                        now_ms - datetime_to_ms(run.last_check_at),
                    )
                };
                Ok(StalledRun {
                    run,
                    reason,
                    lag_secs: lag / 1000,
                })
            })
            .collect()
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &RunListFilter) {
    if let Some(agent) = &filter.agent {
        qb.push(" AND agent = ").push_bind(agent.clone());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(task_id) = &filter.task_id {
        qb.push(" AND task_id = ").push_bind(task_id.clone());
    }
}

pub(crate) fn run_from_row(row: &SqliteRow) -> TxResult<Run> {
    let status: String = row.try_get("status")?;
    Ok(Run {
        id: row.try_get("id")?,
        agent: row.try_get("agent")?,
        task_id: row.try_get("task_id")?,
        pid: row.try_get("pid")?,
        transcript_path: row.try_get("transcript_path")?,
        stdout_bytes: row.try_get("stdout_bytes")?,
        stderr_bytes: row.try_get("stderr_bytes")?,
        transcript_bytes: row.try_get("transcript_bytes")?,
        last_activity_at: ms_to_datetime(row.try_get("last_activity_at")?),
        last_check_at: ms_to_datetime(row.try_get("last_check_at")?),
        status: parse_enum(&status)?,
        exit_code: row.try_get("exit_code")?,
        summary: row.try_get("summary")?,
        error_message: row.try_get("error_message")?,
        created_at: ms_to_datetime(row.try_get("created_at")?),
        updated_at: ms_to_datetime(row.try_get("updated_at")?),
    })
}
