//! Anchor lifecycle service: creation, (lazy) verification with
//! self-healing, restore, pinning, and pruning. Every status transition
//! appends exactly one invalidation-log row.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::AnchorConfig;
use crate::errors::{TxError, TxResult};
use crate::model::anchor::{Anchor, AnchorStatus, AnchorType, DetectedBy, InvalidationRecord, NewAnchor};
use crate::model::edge::{EdgeType, NodeKind};
use crate::repo::{
    anchors::AnchorRepo, edges::EdgeRepo, invalidations::{InvalidationEntry, InvalidationRepo},
    learnings::LearningRepo,
};
use crate::storage::{ms_to_datetime, now_ms};

use super::verify::{self, Verification};

#[derive(Clone)]
pub struct AnchorService {
    anchors: AnchorRepo,
    invalidations: InvalidationRepo,
    edges: EdgeRepo,
    learnings: LearningRepo,
    config: AnchorConfig,
}

impl AnchorService {
    pub fn new(pool: SqlitePool, config: AnchorConfig) -> Self {
        Self {
            anchors: AnchorRepo::new(pool.clone()),
            invalidations: InvalidationRepo::new(pool.clone()),
            edges: EdgeRepo::new(pool.clone()),
            learnings: LearningRepo::new(pool),
            config,
        }
    }

    /// Attach an anchor to a learning. Hash anchors with no stored hash
    /// capture the current region content on the spot.
    pub async fn create(&self, mut new: NewAnchor) -> TxResult<Anchor> {
        new.validate()?;
        self.learnings.require(new.learning_id).await?;

        if new.anchor_type == AnchorType::Hash && new.content_hash.is_none() {
            let path = self.config.project_root.join(&new.file_path);
            let content = std::fs::read_to_string(&path).map_err(|e| {
                TxError::Validation(format!("cannot read {} for hashing: {e}", new.file_path))
            })?;
            let region = verify::region_of(&content, new.line_start, new.line_end);
            new.content_hash = Some(verify::sha256_hex(region.as_bytes()));
            new.content_preview = Some(verify::preview_of(&region));
        }

        let now = now_ms();
        let id = self.anchors.insert(&new, now).await?;
        self.edges
            .insert(
                NodeKind::Learning,
                &new.learning_id.to_string(),
                NodeKind::Anchor,
                &id.to_string(),
                EdgeType::AnchoredAt,
                1.0,
                &serde_json::Value::Object(Default::default()),
                now,
            )
            .await?;
        info!(anchor_id = id, learning_id = new.learning_id, anchor_type = %new.anchor_type, "created anchor");
        self.anchors.require(id).await
    }

    pub async fn get(&self, id: i64) -> TxResult<Anchor> {
        self.anchors.require(id).await
    }

    pub async fn list_for_learning(&self, learning_id: i64) -> TxResult<Vec<Anchor>> {
        self.anchors.list_for_learning(learning_id).await
    }

    pub async fn list_for_path(&self, path: &str) -> TxResult<Vec<Anchor>> {
        self.anchors.list_for_path(path).await
    }

    pub async fn history(&self, id: i64, limit: i64) -> TxResult<Vec<InvalidationRecord>> {
        self.anchors.require(id).await?;
        self.invalidations.list_for(id, limit).await
    }

    /// Verify one anchor now. Pinned anchors skip every automatic
    /// transition (including self-healing); a `manual` trigger overrides.
    pub async fn verify(&self, id: i64, detected_by: DetectedBy) -> TxResult<Anchor> {
        let anchor = self.anchors.require(id).await?;
        if anchor.pinned && detected_by != DetectedBy::Manual {
            return Ok(anchor);
        }
        let outcome = verify::verify(&self.config.project_root, &anchor);
        self.apply_outcome(&anchor, outcome, detected_by).await?;
        self.anchors.require(id).await
    }

    /// Lazy verification: re-check only when the last result is older than
    /// the TTL (or missing).
    pub async fn verify_fresh(&self, id: i64, detected_by: DetectedBy) -> TxResult<Anchor> {
        let anchor = self.anchors.require(id).await?;
        if !anchor.is_stale(ms_to_datetime(now_ms()), self.config.ttl_secs) {
            return Ok(anchor);
        }
        self.verify(id, detected_by).await
    }

    /// Periodic sweep over the least recently verified anchors.
    pub async fn verify_batch(&self, limit: i64) -> TxResult<usize> {
        let mut checked = 0;
        for anchor in self.anchors.list_live(limit).await? {
            if let Err(e) = self.verify(anchor.id, DetectedBy::Periodic).await {
                warn!(anchor_id = anchor.id, error = %e, "periodic verification failed");
            } else {
                checked += 1;
            }
        }
        Ok(checked)
    }

    async fn apply_outcome(
        &self,
        anchor: &Anchor,
        outcome: Verification,
        detected_by: DetectedBy,
    ) -> TxResult<()> {
        let now = now_ms();
        match outcome {
            Verification::Valid => {
                if anchor.status != AnchorStatus::Valid {
                    self.log_transition(
                        anchor,
                        AnchorStatus::Valid,
                        "revalidated",
                        detected_by,
                        anchor.content_hash.clone(),
                        None,
                        now,
                    )
                    .await?;
                }
                self.anchors
                    .apply_verification(anchor.id, AnchorStatus::Valid, None, None, now)
                    .await
            }
            Verification::SelfHealed {
                new_hash,
                new_preview,
                similarity,
            } => {
                self.log_transition(
                    anchor,
                    AnchorStatus::Valid,
                    "self_healed",
                    detected_by,
                    Some(new_hash.clone()),
                    Some(similarity),
                    now,
                )
                .await?;
                info!(anchor_id = anchor.id, similarity, "anchor self-healed");
                self.anchors
                    .apply_verification(
                        anchor.id,
                        AnchorStatus::Valid,
                        Some(&new_hash),
                        Some(&new_preview),
                        now,
                    )
                    .await
            }
            Verification::Drifted {
                reason,
                new_hash,
                similarity,
            } => {
                if anchor.status != AnchorStatus::Drifted {
                    self.log_transition(
                        anchor,
                        AnchorStatus::Drifted,
                        &reason,
                        detected_by,
                        new_hash,
                        similarity,
                        now,
                    )
                    .await?;
                }
                self.anchors
                    .apply_verification(anchor.id, AnchorStatus::Drifted, None, None, now)
                    .await
            }
            Verification::Invalid { reason } => {
                if anchor.status != AnchorStatus::Invalid {
                    self.log_transition(
                        anchor,
                        AnchorStatus::Invalid,
                        &reason,
                        detected_by,
                        None,
                        None,
                        now,
                    )
                    .await?;
                }
                self.anchors
                    .apply_verification(anchor.id, AnchorStatus::Invalid, None, None, now)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_transition(
        &self,
        anchor: &Anchor,
        new_status: AnchorStatus,
        reason: &str,
        detected_by: DetectedBy,
        new_content_hash: Option<String>,
        similarity_score: Option<f64>,
        now: i64,
    ) -> TxResult<()> {
        self.invalidations
            .append(
                &InvalidationEntry {
                    anchor_id: anchor.id,
                    old_status: anchor.status,
                    new_status,
                    reason: reason.to_string(),
                    detected_by,
                    old_content_hash: anchor.content_hash.clone(),
                    new_content_hash,
                    similarity_score,
                },
                now,
            )
            .await?;
        Ok(())
    }

    /// Rewind an anchor to the state recorded by its most recent
    /// invalidation-log entry and log the rewind itself as `manual`.
    pub async fn restore(&self, id: i64) -> TxResult<Anchor> {
        let anchor = self.anchors.require(id).await?;
        let Some(last) = self.invalidations.latest_for(id).await? else {
            return Err(TxError::Validation(format!(
                "anchor {id} has no invalidation history to restore from"
            )));
        };
        let now = now_ms();
        self.invalidations
            .append(
                &InvalidationEntry {
                    anchor_id: id,
                    old_status: anchor.status,
                    new_status: last.old_status,
                    reason: "restore".to_string(),
                    detected_by: DetectedBy::Manual,
                    old_content_hash: anchor.content_hash.clone(),
                    new_content_hash: last.old_content_hash.clone(),
                    similarity_score: None,
                },
                now,
            )
            .await?;
        self.anchors
            .restore(id, last.old_status, last.old_content_hash.as_deref(), now)
            .await?;
        info!(anchor_id = id, restored_status = %last.old_status, "restored anchor");
        self.anchors.require(id).await
    }

    pub async fn set_pinned(&self, id: i64, pinned: bool) -> TxResult<Anchor> {
        self.anchors.require(id).await?;
        self.anchors.set_pinned(id, pinned, now_ms()).await?;
        self.anchors.require(id).await
    }

    /// Delete invalid anchors older than the configured horizon. Valid
    /// anchors are never pruned, whatever their age.
    pub async fn prune(&self) -> TxResult<u64> {
        let cutoff = now_ms() - (self.config.prune_after_days as i64) * 86_400_000;
        let pruned = self.anchors.prune_invalid(cutoff).await?;
        if pruned > 0 {
            info!(pruned, "pruned invalid anchors");
        }
        Ok(pruned)
    }
}
