//! Task repository: CRUD, cursor-paginated listing, the ready-frontier
//! query, and the bounded recursive tree walks.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};

use crate::errors::{TxError, TxResult};
use crate::model::cursor::Cursor;
use crate::model::task::{Task, TaskStatus};
use crate::storage::{self, begin_immediate, datetime_to_ms, ms_to_datetime};

use super::{escape_like, parse_enum};

/// Hard depth bounds for the recursive traversals.
pub const MAX_ANCESTOR_DEPTH: i64 = 100;
pub const MAX_DESCENDANT_DEPTH: i64 = 10;

#[derive(Debug, Clone, Default)]
pub struct TaskListFilter {
    pub status: Option<TaskStatus>,
    pub parent_id: Option<String>,
    pub search: Option<String>,
    pub cursor: Option<Cursor>,
    pub limit: i64,
}

#[derive(Clone)]
pub struct TaskRepo {
    pool: SqlitePool,
}

impl TaskRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a fully-formed task row. Returns `false` on id collision so
    /// the engine can retry with a fresh suffix.
    pub async fn try_insert(&self, task: &Task) -> TxResult<bool> {
        let result = sqlx::query(
            r#"INSERT INTO tasks (id, title, description, status, score, parent_id,
               metadata, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.score)
        .bind(&task.parent_id)
        .bind(serde_json::to_string(&task.metadata)?)
        .bind(datetime_to_ms(task.created_at))
        .bind(datetime_to_ms(task.updated_at))
        .bind(task.completed_at.map(datetime_to_ms))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db))
                if db.kind() == sqlx::error::ErrorKind::UniqueViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: &str) -> TxResult<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    pub async fn require(&self, id: &str) -> TxResult<Task> {
        self.get(id)
            .await?
            .ok_or_else(|| TxError::NotFound("task", id.to_string()))
    }

    pub async fn exists(&self, id: &str) -> TxResult<bool> {
        let row = sqlx::query("SELECT 1 FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Overwrite every mutable column from the given task value.
    pub async fn update(&self, task: &Task) -> TxResult<()> {
        let affected = sqlx::query(
            r#"UPDATE tasks SET title = ?, description = ?, status = ?, score = ?,
               parent_id = ?, metadata = ?, updated_at = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.score)
        .bind(&task.parent_id)
        .bind(serde_json::to_string(&task.metadata)?)
        .bind(datetime_to_ms(task.updated_at))
        .bind(task.completed_at.map(datetime_to_ms))
        .bind(&task.id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(TxError::NotFound("task", task.id.clone()));
        }
        Ok(())
    }

    /// Delete the given ids in one statement. Dependency edges cascade via
    /// foreign keys; surviving children are detached by SET NULL.
    pub async fn delete_all(&self, ids: &[String]) -> TxResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM tasks WHERE id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id);
        }
        qb.push(")");
        Ok(qb.build().execute(&self.pool).await?.rows_affected())
    }

    pub async fn children_ids(&self, id: &str) -> TxResult<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM tasks WHERE parent_id = ? ORDER BY score DESC, id ASC")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| Ok(r.try_get("id")?)).collect()
    }

    pub async fn children(&self, id: &str) -> TxResult<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE parent_id = ? ORDER BY score DESC, id ASC")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    pub async fn has_children(&self, id: &str) -> TxResult<bool> {
        let row = sqlx::query("SELECT 1 FROM tasks WHERE parent_id = ? LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Walk the parent chain upward, nearest ancestor first.
    pub async fn ancestors(&self, id: &str) -> TxResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"WITH RECURSIVE up(id, depth) AS (
                   SELECT parent_id, 1 FROM tasks
                   WHERE id = ? AND parent_id IS NOT NULL
                   UNION
                   SELECT t.parent_id, u.depth + 1
                   FROM tasks t JOIN up u ON t.id = u.id
                   WHERE t.parent_id IS NOT NULL AND u.depth < ?
               )
               SELECT t.*, u.depth AS depth FROM tasks t
               JOIN up u ON t.id = u.id
               ORDER BY u.depth ASC"#,
        )
        .bind(id)
        .bind(MAX_ANCESTOR_DEPTH)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Walk children downward, breadth-first by depth then priority order.
    pub async fn descendants(&self, id: &str, max_depth: i64) -> TxResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"WITH RECURSIVE sub(id, depth) AS (
                   SELECT id, 1 FROM tasks WHERE parent_id = ?
                   UNION
                   SELECT t.id, s.depth + 1
                   FROM tasks t JOIN sub s ON t.parent_id = s.id
                   WHERE s.depth < ?
               )
               SELECT t.*, s.depth AS depth FROM tasks t
               JOIN sub s ON t.id = s.id
               ORDER BY s.depth ASC, t.score DESC, t.id ASC"#,
        )
        .bind(id)
        .bind(max_depth)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Cursor-paginated listing ordered by `(score DESC, id ASC)`.
    /// Returns the page plus the total matching count.
    pub async fn list(&self, filter: &TaskListFilter) -> TxResult<(Vec<Task>, i64)> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM tasks WHERE 1 = 1");
        push_filters(&mut qb, filter);
        if let Some(cursor) = &filter.cursor {
            qb.push(" AND (score < ")
                .push_bind(cursor.score)
                .push(" OR (score = ")
                .push_bind(cursor.score)
                .push(" AND id > ")
                .push_bind(cursor.id.clone())
                .push("))");
        }
        qb.push(" ORDER BY score DESC, id ASC LIMIT ").push_bind(filter.limit);
        let rows = qb.build().fetch_all(&self.pool).await?;
        let tasks: TxResult<Vec<Task>> = rows.iter().map(task_from_row).collect();

        let mut count_qb =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS n FROM tasks WHERE 1 = 1");
        push_filters(&mut count_qb, filter);
        let total: i64 = count_qb.build().fetch_one(&self.pool).await?.try_get("n")?;

        Ok((tasks?, total))
    }

    /// The ready frontier: workable tasks whose every blocker is done,
    /// optionally excluding tasks under an active claim.
    pub async fn ready(&self, limit: i64, exclude_claimed: bool) -> TxResult<Vec<Task>> {
        let claimed_clause = if exclude_claimed {
            "AND NOT EXISTS (SELECT 1 FROM claims c
                             WHERE c.task_id = t.id AND c.status = 'active')"
        } else {
            ""
        };
        let sql = format!(
            r#"SELECT t.* FROM tasks t
               WHERE t.status IN ('backlog', 'ready', 'planning')
                 AND NOT EXISTS (
                     SELECT 1 FROM task_deps d
                     JOIN tasks b ON b.id = d.blocker_id
                     WHERE d.task_id = t.id AND b.status <> 'done')
                 {claimed_clause}
               ORDER BY t.score DESC, t.id ASC
               LIMIT ?"#
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Blocker ids with their statuses, for one-shot readiness checks.
    pub async fn blocker_statuses(&self, id: &str) -> TxResult<Vec<(String, TaskStatus)>> {
        let rows = sqlx::query(
            r#"SELECT d.blocker_id AS id, b.status AS status
               FROM task_deps d JOIN tasks b ON b.id = d.blocker_id
               WHERE d.task_id = ? ORDER BY d.blocker_id"#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let id: String = r.try_get("id")?;
                let status: String = r.try_get("status")?;
                Ok((id, parse_enum(&status)?))
            })
            .collect()
    }

    /// Apply one field patch to many tasks inside a single IMMEDIATE
    /// transaction with an optimistic `updated_at` check.
    pub async fn update_many(
        &self,
        ids: &[String],
        status: Option<TaskStatus>,
        score: Option<i64>,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> TxResult<Vec<Task>> {
        let mut tx = begin_immediate(&self.pool).await?;
        let now = storage::now_ms();
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| TxError::NotFound("task", id.clone()))?;
            let mut task = task_from_row(&row)?;
            if let Some(expected) = expected_updated_at {
                if task.updated_at > expected {
                    return Err(TxError::StaleData(id.clone()));
                }
            }
            if let Some(next) = status {
                if !task.status.can_transition(next) {
                    return Err(TxError::IllegalTransition {
                        from: task.status.to_string(),
                        to: next.to_string(),
                    });
                }
                task.completed_at = match (task.status, next) {
                    (_, TaskStatus::Done) => Some(ms_to_datetime(now)),
                    (TaskStatus::Done, _) => None,
                    _ => task.completed_at,
                };
                task.status = next;
            }
            if let Some(score) = score {
                task.score = score;
            }
            task.updated_at = ms_to_datetime(now);
            sqlx::query(
                "UPDATE tasks SET status = ?, score = ?, updated_at = ?, completed_at = ? WHERE id = ?",
            )
            .bind(task.status.as_str())
            .bind(task.score)
            .bind(now)
            .bind(task.completed_at.map(datetime_to_ms))
            .bind(id)
            .execute(&mut *tx)
            .await?;
            updated.push(task);
        }
        tx.commit().await?;
        Ok(updated)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &TaskListFilter) {
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(parent) = &filter.parent_id {
        qb.push(" AND parent_id = ").push_bind(parent.clone());
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (title LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR description LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

pub(crate) fn task_from_row(row: &SqliteRow) -> TxResult<Task> {
    let status: String = row.try_get("status")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(Task {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: parse_enum(&status)?,
        score: row.try_get("score")?,
        parent_id: row.try_get("parent_id")?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: ms_to_datetime(row.try_get("created_at")?),
        updated_at: ms_to_datetime(row.try_get("updated_at")?),
        completed_at: row
            .try_get::<Option<i64>, _>("completed_at")?
            .map(ms_to_datetime),
    })
}
