//! Learning store (create, read, outcome, delete). Search goes through the
//! retrieval pipeline; this type owns the write paths.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::errors::TxResult;
use crate::model::edge::NodeKind;
use crate::model::learning::{Learning, NewLearning, validate_outcome_score};
use crate::repo::{
    anchors::AnchorRepo, edges::EdgeRepo, learnings::LearningRepo,
};
use crate::storage::now_ms;

use super::embedding::EmbeddingProvider;
use super::tokenize;

#[derive(Clone)]
pub struct LearningStore {
    learnings: LearningRepo,
    anchors: AnchorRepo,
    edges: EdgeRepo,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LearningStore {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            learnings: LearningRepo::new(pool.clone()),
            anchors: AnchorRepo::new(pool.clone()),
            edges: EdgeRepo::new(pool),
            embedder,
        }
    }

    /// Persist a learning. Keywords fall back to the tokenizer when the
    /// caller supplies none. Embedding computation is best-effort: a
    /// provider failure logs and leaves the row lexical-only.
    pub async fn create(&self, new: NewLearning) -> TxResult<Learning> {
        new.validate()?;
        let keywords = if new.keywords.is_empty() {
            tokenize::keywords(&new.content, tokenize::KEYWORD_CAP)
        } else {
            new.keywords.clone()
        };
        let id = self.learnings.insert(&new, &keywords, now_ms()).await?;

        if self.embedder.is_enabled() {
            match self.embedder.embed(&new.content).await {
                Ok(Some(vector)) => self.learnings.set_embedding(id, &vector).await?,
                Ok(None) => {}
                Err(e) => warn!(learning_id = id, error = %e, "embedding failed, keeping lexical-only"),
            }
        }
        info!(learning_id = id, source = %new.source_type, "created learning");
        self.learnings.require(id).await
    }

    pub async fn get(&self, id: i64) -> TxResult<Learning> {
        self.learnings.require(id).await
    }

    pub async fn list_recent(&self, limit: i64) -> TxResult<Vec<Learning>> {
        self.learnings.list_recent(limit.clamp(1, 200)).await
    }

    /// Learnings attached to a file path (source type `file`).
    pub async fn by_file_path(&self, path: &str) -> TxResult<Vec<Learning>> {
        self.learnings.by_file_path(path).await
    }

    /// Record an outcome signal in [0, 1] for a learning.
    pub async fn set_outcome(&self, id: i64, score: f64) -> TxResult<Learning> {
        validate_outcome_score(score)?;
        self.learnings.set_outcome(id, score, now_ms()).await?;
        self.learnings.require(id).await
    }

    /// Bump usage counters for learnings that were just served as context.
    pub async fn record_use(&self, ids: &[i64]) -> TxResult<()> {
        let now = now_ms();
        for id in ids {
            self.learnings.bump_usage(*id, now).await?;
        }
        Ok(())
    }

    /// Soft-delete a learning; its anchors leave the live view and every
    /// edge touching it is invalidated.
    pub async fn delete(&self, id: i64) -> TxResult<bool> {
        let now = now_ms();
        let deleted = self.learnings.soft_delete(id, now).await?;
        if deleted {
            let anchors = self.anchors.soft_delete_for_learning(id, now).await?;
            let edges = self
                .edges
                .invalidate_for_node(NodeKind::Learning, &id.to_string(), now)
                .await?;
            info!(
                learning_id = id,
                anchors = anchors.len(),
                edges,
                "deleted learning"
            );
        }
        Ok(deleted)
    }
}
