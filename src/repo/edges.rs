//! Graph-edge repository over the heterogeneous node set.

use std::collections::HashMap;

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow};

use crate::errors::TxResult;
use crate::model::edge::{Edge, EdgeType, NodeKind};
use crate::storage::ms_to_datetime;

use super::parse_enum;

#[derive(Clone)]
pub struct EdgeRepo {
    pool: SqlitePool,
}

impl EdgeRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        src_type: NodeKind,
        src_id: &str,
        dst_type: NodeKind,
        dst_id: &str,
        edge_type: EdgeType,
        weight: f64,
        metadata: &serde_json::Value,
        now_ms: i64,
    ) -> TxResult<i64> {
        let id = sqlx::query(
            r#"INSERT INTO edges (src_type, src_id, dst_type, dst_id, edge_type,
               weight, metadata, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(src_type.as_str())
        .bind(src_id)
        .bind(dst_type.as_str())
        .bind(dst_id)
        .bind(edge_type.as_str())
        .bind(weight)
        .bind(serde_json::to_string(metadata)?)
        .bind(now_ms)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Soft-delete every live edge touching a node (either endpoint).
    pub async fn invalidate_for_node(
        &self,
        kind: NodeKind,
        id: &str,
        now_ms: i64,
    ) -> TxResult<u64> {
        let affected = sqlx::query(
            r#"UPDATE edges SET invalidated_at = ?1
               WHERE invalidated_at IS NULL
                 AND ((src_type = ?2 AND src_id = ?3) OR (dst_type = ?2 AND dst_id = ?3))"#,
        )
        .bind(now_ms)
        .bind(kind.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected)
    }

    pub async fn live_from(
        &self,
        src_type: NodeKind,
        src_id: &str,
        edge_type: EdgeType,
    ) -> TxResult<Vec<Edge>> {
        let rows = sqlx::query(
            r#"SELECT * FROM edges
               WHERE src_type = ? AND src_id = ? AND edge_type = ? AND invalidated_at IS NULL
               ORDER BY id"#,
        )
        .bind(src_type.as_str())
        .bind(src_id)
        .bind(edge_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(edge_from_row).collect()
    }

    /// Helpful/total counts over live USED_IN_RUN edges for one learning.
    pub async fn usage_stats(&self, learning_id: i64) -> TxResult<(i64, i64)> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS total,
                      COALESCE(SUM(CASE WHEN weight >= 0.5 THEN 1 ELSE 0 END), 0) AS helpful
               FROM edges
               WHERE edge_type = 'USED_IN_RUN' AND src_type = 'learning'
                 AND src_id = ? AND invalidated_at IS NULL"#,
        )
        .bind(learning_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok((row.try_get("helpful")?, row.try_get("total")?))
    }

    /// Batched usage stats keyed by learning id, for the scoring pass.
    pub async fn usage_stats_many(
        &self,
        learning_ids: &[i64],
    ) -> TxResult<HashMap<i64, (i64, i64)>> {
        if learning_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut qb = QueryBuilder::<Sqlite>::new(
            r#"SELECT src_id,
                      COUNT(*) AS total,
                      COALESCE(SUM(CASE WHEN weight >= 0.5 THEN 1 ELSE 0 END), 0) AS helpful
               FROM edges
               WHERE edge_type = 'USED_IN_RUN' AND src_type = 'learning'
                 AND invalidated_at IS NULL AND src_id IN ("#,
        );
        let mut sep = qb.separated(", ");
        for id in learning_ids {
            sep.push_bind(id.to_string());
        }
        qb.push(") GROUP BY src_id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in &rows {
            let src_id: String = row.try_get("src_id")?;
            let Ok(id) = src_id.parse::<i64>() else {
                continue;
            };
            out.insert(id, (row.try_get("helpful")?, row.try_get("total")?));
        }
        Ok(out)
    }
}

pub(crate) fn edge_from_row(row: &SqliteRow) -> TxResult<Edge> {
    let src_type: String = row.try_get("src_type")?;
    let dst_type: String = row.try_get("dst_type")?;
    let edge_type: String = row.try_get("edge_type")?;
    let metadata: String = row.try_get("metadata")?;
    Ok(Edge {
        id: row.try_get("id")?,
        src_type: parse_enum(&src_type)?,
        src_id: row.try_get("src_id")?,
        dst_type: parse_enum(&dst_type)?,
        dst_id: row.try_get("dst_id")?,
        edge_type: parse_enum(&edge_type)?,
        weight: row.try_get("weight")?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: ms_to_datetime(row.try_get("created_at")?),
        invalidated_at: row
            .try_get::<Option<i64>, _>("invalidated_at")?
            .map(ms_to_datetime),
    })
}
