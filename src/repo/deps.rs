//! Dependency-edge repository. Edges are directed (blocker -> blocked) and
//! stored as `(task_id, blocker_id)` rows; the graph must stay acyclic,
//! which the cycle probe below enforces before every insert.

use sqlx::{Row, SqlitePool};

use crate::errors::TxResult;
use crate::storage::now_ms;

use super::tasks::MAX_ANCESTOR_DEPTH;

#[derive(Clone)]
pub struct DepRepo {
    pool: SqlitePool,
}

impl DepRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the edge `blocker -> task`. Duplicates are idempotent.
    pub async fn add(&self, task_id: &str, blocker_id: &str) -> TxResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO task_deps (task_id, blocker_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(task_id)
        .bind(blocker_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, task_id: &str, blocker_id: &str) -> TxResult<bool> {
        let affected = sqlx::query("DELETE FROM task_deps WHERE task_id = ? AND blocker_id = ?")
            .bind(task_id)
            .bind(blocker_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    /// Ids of tasks that must finish before `task_id`.
    pub async fn blockers_of(&self, task_id: &str) -> TxResult<Vec<String>> {
        let rows =
            sqlx::query("SELECT blocker_id FROM task_deps WHERE task_id = ? ORDER BY blocker_id")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(|r| Ok(r.try_get("blocker_id")?)).collect()
    }

    /// Ids of tasks that `blocker_id` blocks.
    pub async fn blocked_by(&self, blocker_id: &str) -> TxResult<Vec<String>> {
        let rows =
            sqlx::query("SELECT task_id FROM task_deps WHERE blocker_id = ? ORDER BY task_id")
                .bind(blocker_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(|r| Ok(r.try_get("task_id")?)).collect()
    }

    /// Whether `needle` appears in the transitive blocker closure of
    /// `start`. One recursive traversal, depth-bounded; used to reject
    /// cycle-forming edges before they exist.
    pub async fn closure_contains(&self, start: &str, needle: &str) -> TxResult<bool> {
        let row = sqlx::query(
            r#"WITH RECURSIVE closure(id, depth) AS (
                   SELECT blocker_id, 1 FROM task_deps WHERE task_id = ?
                   UNION
                   SELECT d.blocker_id, c.depth + 1
                   FROM task_deps d JOIN closure c ON d.task_id = c.id
                   WHERE c.depth < ?
               )
               SELECT 1 FROM closure WHERE id = ? LIMIT 1"#,
        )
        .bind(start)
        .bind(MAX_ANCESTOR_DEPTH)
        .bind(needle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
