//! Append-only audit log of anchor status transitions.

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

use crate::errors::TxResult;
use crate::model::anchor::{AnchorStatus, DetectedBy, InvalidationRecord};
use crate::storage::ms_to_datetime;

use super::parse_enum;

/// Everything one audit row captures about a transition.
#[derive(Debug, Clone)]
pub struct InvalidationEntry {
    pub anchor_id: i64,
    pub old_status: AnchorStatus,
    pub new_status: AnchorStatus,
    pub reason: String,
    pub detected_by: DetectedBy,
    pub old_content_hash: Option<String>,
    pub new_content_hash: Option<String>,
    pub similarity_score: Option<f64>,
}

#[derive(Clone)]
pub struct InvalidationRepo {
    pool: SqlitePool,
}

impl InvalidationRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn append(&self, entry: &InvalidationEntry, now_ms: i64) -> TxResult<i64> {
        let id = sqlx::query(
            r#"INSERT INTO anchor_invalidations (anchor_id, old_status, new_status,
               reason, detected_by, old_content_hash, new_content_hash,
               similarity_score, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.anchor_id)
        .bind(entry.old_status.as_str())
        .bind(entry.new_status.as_str())
        .bind(&entry.reason)
        .bind(entry.detected_by.as_str())
        .bind(&entry.old_content_hash)
        .bind(&entry.new_content_hash)
        .bind(entry.similarity_score)
        .bind(now_ms)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Most recent entry for an anchor, the one `restore` rewinds to.
    pub async fn latest_for(&self, anchor_id: i64) -> TxResult<Option<InvalidationRecord>> {
        let row = sqlx::query(
            "SELECT * FROM anchor_invalidations WHERE anchor_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(anchor_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn list_for(&self, anchor_id: i64, limit: i64) -> TxResult<Vec<InvalidationRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM anchor_invalidations WHERE anchor_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(anchor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: &SqliteRow) -> TxResult<InvalidationRecord> {
    let old_status: String = row.try_get("old_status")?;
    let new_status: String = row.try_get("new_status")?;
    let detected_by: String = row.try_get("detected_by")?;
    Ok(InvalidationRecord {
        id: row.try_get("id")?,
        anchor_id: row.try_get("anchor_id")?,
        old_status: parse_enum(&old_status)?,
        new_status: parse_enum(&new_status)?,
        reason: row.try_get("reason")?,
        detected_by: parse_enum(&detected_by)?,
        old_content_hash: row.try_get("old_content_hash")?,
        new_content_hash: row.try_get("new_content_hash")?,
        similarity_score: row.try_get("similarity_score")?,
        created_at: ms_to_datetime(row.try_get("created_at")?),
    })
}
