//! Learning repository. The FTS5 companion table is written in the same
//! transaction as every row change so the lexical index always mirrors the
//! set of non-deleted learnings.

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};

use crate::errors::{TxError, TxResult};
use crate::model::learning::{Learning, NewLearning};
use crate::storage::{begin_immediate, ms_to_datetime};

use super::parse_enum;

/// Encode a dense vector as little-endian f32 bytes for the blob column.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a stored embedding blob. Trailing partial floats are dropped.
pub fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[derive(Clone)]
pub struct LearningRepo {
    pool: SqlitePool,
}

impl LearningRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the learning and its full-text row atomically, returning the
    /// assigned id.
    pub async fn insert(
        &self,
        new: &NewLearning,
        keywords: &[String],
        now_ms: i64,
    ) -> TxResult<i64> {
        let mut tx = begin_immediate(&self.pool).await?;
        let id = sqlx::query(
            r#"INSERT INTO learnings (content, source_type, source_ref, keywords,
               category, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&new.content)
        .bind(new.source_type.as_str())
        .bind(&new.source_ref)
        .bind(serde_json::to_string(keywords)?)
        .bind(&new.category)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        sqlx::query("INSERT INTO learnings_fts (rowid, content, keywords) VALUES (?, ?, ?)")
            .bind(id)
            .bind(&new.content)
            .bind(keywords.join(" "))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> TxResult<Option<Learning>> {
        let row = sqlx::query("SELECT * FROM learnings WHERE id = ? AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(learning_from_row).transpose()
    }

    pub async fn require(&self, id: i64) -> TxResult<Learning> {
        self.get(id)
            .await?
            .ok_or_else(|| TxError::NotFound("learning", id.to_string()))
    }

    /// Fetch many learnings by id; the caller re-establishes ordering.
    pub async fn fetch_many(&self, ids: &[i64]) -> TxResult<Vec<Learning>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT * FROM learnings WHERE deleted_at IS NULL AND id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(learning_from_row).collect()
    }

    pub async fn list_recent(&self, limit: i64) -> TxResult<Vec<Learning>> {
        let rows = sqlx::query(
            "SELECT * FROM learnings WHERE deleted_at IS NULL ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(learning_from_row).collect()
    }

    pub async fn by_file_path(&self, path: &str) -> TxResult<Vec<Learning>> {
        let rows = sqlx::query(
            r#"SELECT * FROM learnings
               WHERE deleted_at IS NULL AND source_type = 'file' AND source_ref = ?
               ORDER BY created_at DESC, id DESC"#,
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(learning_from_row).collect()
    }

    /// BM25 candidates for one query string, best match first. The score is
    /// negated so larger means more relevant.
    pub async fn search_bm25(&self, match_query: &str, limit: i64) -> TxResult<Vec<(i64, f64)>> {
        let rows = sqlx::query(
            r#"SELECT f.rowid AS id, -bm25(learnings_fts) AS score
               FROM learnings_fts f
               WHERE learnings_fts MATCH ?
               ORDER BY bm25(learnings_fts) ASC
               LIMIT ?"#,
        )
        .bind(match_query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok((r.try_get("id")?, r.try_get("score")?)))
            .collect()
    }

    /// Every stored embedding, for brute-force cosine search.
    pub async fn embeddings(&self) -> TxResult<Vec<(i64, Vec<f32>)>> {
        let rows = sqlx::query(
            "SELECT id, embedding FROM learnings WHERE embedding IS NOT NULL AND deleted_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let id: i64 = r.try_get("id")?;
                let blob: Vec<u8> = r.try_get("embedding")?;
                Ok((id, decode_embedding(&blob)))
            })
            .collect()
    }

    /// Embeddings for a specific candidate set, for the MMR pass.
    pub async fn embeddings_for(&self, ids: &[i64]) -> TxResult<Vec<(i64, Vec<f32>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, embedding FROM learnings WHERE embedding IS NOT NULL AND deleted_at IS NULL AND id IN (",
        );
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| {
                let id: i64 = r.try_get("id")?;
                let blob: Vec<u8> = r.try_get("embedding")?;
                Ok((id, decode_embedding(&blob)))
            })
            .collect()
    }

    pub async fn set_embedding(&self, id: i64, vector: &[f32]) -> TxResult<()> {
        sqlx::query("UPDATE learnings SET embedding = ? WHERE id = ? AND deleted_at IS NULL")
            .bind(encode_embedding(vector))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn bump_usage(&self, id: i64, now_ms: i64) -> TxResult<()> {
        sqlx::query(
            "UPDATE learnings SET usage_count = usage_count + 1, last_used_at = ? WHERE id = ?",
        )
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_outcome(&self, id: i64, score: f64, now_ms: i64) -> TxResult<()> {
        let affected = sqlx::query(
            "UPDATE learnings SET outcome_score = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(score)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(TxError::NotFound("learning", id.to_string()));
        }
        Ok(())
    }

    /// Soft-delete the learning and drop it from the lexical index in the
    /// same transaction. Returns false when it was already gone.
    pub async fn soft_delete(&self, id: i64, now_ms: i64) -> TxResult<bool> {
        let mut tx = begin_immediate(&self.pool).await?;
        let affected = sqlx::query(
            "UPDATE learnings SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if affected > 0 {
            sqlx::query("DELETE FROM learnings_fts WHERE rowid = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(affected > 0)
    }
}

pub(crate) fn learning_from_row(row: &SqliteRow) -> TxResult<Learning> {
    let source_type: String = row.try_get("source_type")?;
    let keywords: String = row.try_get("keywords")?;
    Ok(Learning {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        source_type: parse_enum(&source_type)?,
        source_ref: row.try_get("source_ref")?,
        keywords: serde_json::from_str(&keywords)?,
        category: row.try_get("category")?,
        usage_count: row.try_get("usage_count")?,
        last_used_at: row
            .try_get::<Option<i64>, _>("last_used_at")?
            .map(ms_to_datetime),
        outcome_score: row.try_get("outcome_score")?,
        has_embedding: row.try_get::<Option<Vec<u8>>, _>("embedding")?.is_some(),
        created_at: ms_to_datetime(row.try_get("created_at")?),
        updated_at: ms_to_datetime(row.try_get("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_codec_roundtrip() {
        let v = vec![0.0f32, 1.5, -2.25, 3.75];
        let blob = encode_embedding(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(decode_embedding(&blob), v);
    }

    #[test]
    fn test_embedding_decode_ignores_partial_tail() {
        let mut blob = encode_embedding(&[1.0f32]);
        blob.push(0xff);
        assert_eq!(decode_embedding(&blob), vec![1.0f32]);
    }
}
