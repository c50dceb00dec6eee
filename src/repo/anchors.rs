//! Anchor repository.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::errors::{TxError, TxResult};
use crate::model::anchor::{Anchor, AnchorStatus, NewAnchor};
use crate::storage::ms_to_datetime;

use super::parse_enum;

#[derive(Clone)]
pub struct AnchorRepo {
    pool: SqlitePool,
}

impl AnchorRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, new: &NewAnchor, now_ms: i64) -> TxResult<i64> {
        let id = sqlx::query(
            r#"INSERT INTO anchors (learning_id, anchor_type, file_path, anchor_value,
               content_hash, content_preview, symbol_name, line_start, line_end,
               status, pinned, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'valid', ?, ?, ?)"#,
        )
        .bind(new.learning_id)
        .bind(new.anchor_type.as_str())
        .bind(&new.file_path)
        .bind(&new.anchor_value)
        .bind(&new.content_hash)
        .bind(&new.content_preview)
        .bind(&new.symbol_name)
        .bind(new.line_start)
        .bind(new.line_end)
        .bind(new.pinned as i64)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> TxResult<Option<Anchor>> {
        let row = sqlx::query("SELECT * FROM anchors WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(anchor_from_row).transpose()
    }

    pub async fn require(&self, id: i64) -> TxResult<Anchor> {
        self.get(id)
            .await?
            .ok_or_else(|| TxError::NotFound("anchor", id.to_string()))
    }

    pub async fn list_for_learning(&self, learning_id: i64) -> TxResult<Vec<Anchor>> {
        let rows = sqlx::query(
            "SELECT * FROM anchors WHERE learning_id = ? AND deleted_at IS NULL ORDER BY id",
        )
        .bind(learning_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(anchor_from_row).collect()
    }

    pub async fn list_for_path(&self, path: &str) -> TxResult<Vec<Anchor>> {
        let rows = sqlx::query(
            "SELECT * FROM anchors WHERE file_path = ? AND deleted_at IS NULL ORDER BY id",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(anchor_from_row).collect()
    }

    /// Live anchors in verification order (least recently verified first).
    pub async fn list_live(&self, limit: i64) -> TxResult<Vec<Anchor>> {
        let rows = sqlx::query(
            r#"SELECT * FROM anchors WHERE deleted_at IS NULL
               ORDER BY COALESCE(verified_at, 0) ASC, id ASC LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(anchor_from_row).collect()
    }

    /// Persist the outcome of one verification pass.
    pub async fn apply_verification(
        &self,
        id: i64,
        status: AnchorStatus,
        content_hash: Option<&str>,
        content_preview: Option<&str>,
        now_ms: i64,
    ) -> TxResult<()> {
        sqlx::query(
            r#"UPDATE anchors SET status = ?,
                   content_hash = COALESCE(?, content_hash),
                   content_preview = COALESCE(?, content_preview),
                   verified_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(content_hash)
        .bind(content_preview)
        .bind(now_ms)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Restore a prior status and content hash (manual operation).
    pub async fn restore(
        &self,
        id: i64,
        status: AnchorStatus,
        content_hash: Option<&str>,
        now_ms: i64,
    ) -> TxResult<()> {
        sqlx::query(
            "UPDATE anchors SET status = ?, content_hash = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(content_hash)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_pinned(&self, id: i64, pinned: bool, now_ms: i64) -> TxResult<()> {
        sqlx::query("UPDATE anchors SET pinned = ?, updated_at = ? WHERE id = ?")
            .bind(pinned as i64)
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Soft-delete every live anchor of a learning; returns the ids touched.
    pub async fn soft_delete_for_learning(
        &self,
        learning_id: i64,
        now_ms: i64,
    ) -> TxResult<Vec<i64>> {
        let rows = sqlx::query(
            "SELECT id FROM anchors WHERE learning_id = ? AND deleted_at IS NULL",
        )
        .bind(learning_id)
        .fetch_all(&self.pool)
        .await?;
        let ids: Vec<i64> = rows
            .iter()
            .map(|r| r.try_get("id"))
            .collect::<Result<_, _>>()?;
        sqlx::query(
            "UPDATE anchors SET deleted_at = ?, updated_at = ? WHERE learning_id = ? AND deleted_at IS NULL",
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(learning_id)
        .execute(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Hard-delete invalid anchors that went invalid before the cutoff.
    /// Valid anchors of any age are never touched.
    pub async fn prune_invalid(&self, cutoff_ms: i64) -> TxResult<u64> {
        let affected = sqlx::query("DELETE FROM anchors WHERE status = 'invalid' AND updated_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }
}

pub(crate) fn anchor_from_row(row: &SqliteRow) -> TxResult<Anchor> {
    let anchor_type: String = row.try_get("anchor_type")?;
    let status: String = row.try_get("status")?;
    Ok(Anchor {
        id: row.try_get("id")?,
        learning_id: row.try_get("learning_id")?,
        anchor_type: parse_enum(&anchor_type)?,
        file_path: row.try_get("file_path")?,
        anchor_value: row.try_get("anchor_value")?,
        content_hash: row.try_get("content_hash")?,
        content_preview: row.try_get("content_preview")?,
        symbol_name: row.try_get("symbol_name")?,
        line_start: row.try_get("line_start")?,
        line_end: row.try_get("line_end")?,
        status: parse_enum(&status)?,
        pinned: row.try_get::<i64, _>("pinned")? != 0,
        verified_at: row
            .try_get::<Option<i64>, _>("verified_at")?
            .map(ms_to_datetime),
        created_at: ms_to_datetime(row.try_get("created_at")?),
        updated_at: ms_to_datetime(row.try_get("updated_at")?),
    })
}
