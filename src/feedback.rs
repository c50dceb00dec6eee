//! Feedback tracker: per-run helpfulness recorded as `USED_IN_RUN` edges,
//! summarized as a Bayesian mean that feeds the retrieval scorer.

use sqlx::SqlitePool;
use tracing::info;

use crate::errors::TxResult;
use crate::model::edge::{EdgeType, NodeKind};
use crate::repo::{edges::EdgeRepo, runs::RunRepo};
use crate::storage::now_ms;

/// Neutral prior and its pseudo-observation weight.
pub const FEEDBACK_PRIOR: f64 = 0.5;
pub const FEEDBACK_PRIOR_WEIGHT: f64 = 2.0;

/// `(helpful + prior * prior_weight) / (total + prior_weight)`.
/// No observations yield exactly the neutral prior.
pub fn bayesian_score(helpful: i64, total: i64) -> f64 {
    (helpful as f64 + FEEDBACK_PRIOR * FEEDBACK_PRIOR_WEIGHT)
        / (total as f64 + FEEDBACK_PRIOR_WEIGHT)
}

#[derive(Clone)]
pub struct FeedbackTracker {
    edges: EdgeRepo,
    runs: RunRepo,
}

impl FeedbackTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            edges: EdgeRepo::new(pool.clone()),
            runs: RunRepo::new(pool),
        }
    }

    /// Record which learnings a run actually used and whether each helped.
    /// One `USED_IN_RUN` edge per learning; weight 1.0 when helpful.
    pub async fn record_usage(
        &self,
        run_id: &str,
        learnings: &[(i64, bool)],
    ) -> TxResult<usize> {
        self.runs.require(run_id).await?;
        let now = now_ms();
        for (position, (learning_id, helpful)) in learnings.iter().enumerate() {
            let metadata = serde_json::json!({
                "position": position,
                "recordedAt": now,
            });
            self.edges
                .insert(
                    NodeKind::Learning,
                    &learning_id.to_string(),
                    NodeKind::Run,
                    run_id,
                    EdgeType::UsedInRun,
                    if *helpful { 1.0 } else { 0.0 },
                    &metadata,
                    now,
                )
                .await?;
        }
        info!(run_id, count = learnings.len(), "recorded usage feedback");
        Ok(learnings.len())
    }

    /// Bayesian helpfulness over live edges; 0.5 with no observations.
    pub async fn feedback_score(&self, learning_id: i64) -> TxResult<f64> {
        let (helpful, total) = self.edges.usage_stats(learning_id).await?;
        Ok(bayesian_score(helpful, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bayesian_neutral_with_no_edges() {
        assert_eq!(bayesian_score(0, 0), 0.5);
    }

    #[test]
    fn test_bayesian_pulls_toward_observations() {
        // 3 helpful of 3: (3 + 1) / (3 + 2) = 0.8
        assert!((bayesian_score(3, 3) - 0.8).abs() < 1e-12);
        // 0 helpful of 3: (0 + 1) / (3 + 2) = 0.2
        assert!((bayesian_score(0, 3) - 0.2).abs() < 1e-12);
        // One positive observation barely moves the prior.
        assert!((bayesian_score(1, 1) - 2.0 / 3.0).abs() < 1e-12);
    }
}
