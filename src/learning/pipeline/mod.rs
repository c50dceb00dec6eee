//! The retrieval pipeline: query expansion, parallel BM25 + dense
//! retrieval per variant, reciprocal rank fusion, relevance assembly,
//! optional reranking, and MMR diversification.
//!
//! Every collaborator is optional. With all of them replaced by their
//! noops the pipeline is plain BM25 ordered by blended relevance, and it
//! must never hard-fail because a collaborator is absent.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::errors::{TxError, TxResult};
use crate::feedback::bayesian_score;
use crate::model::learning::{Learning, ScoredLearning};
use crate::repo::{edges::EdgeRepo, learnings::LearningRepo};
use crate::storage::now_ms;

pub mod expansion;
pub mod fusion;
pub mod mmr;
pub mod rerank;
pub mod scoring;

pub use expansion::{NoopExpander, QueryExpander};
pub use rerank::{NoopReranker, Reranker};

use super::embedding::{EmbeddingProvider, cosine_similarity};

/// Candidates fetched per variant per modality.
const CANDIDATES_PER_LIST: i64 = 100;

/// The reranker sees this multiple of the requested limit.
const RERANK_MULTIPLE: usize = 3;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_score: Option<f64>,
    pub category: Option<String>,
    /// When set, an offline embedding provider is a hard 503 instead of a
    /// silent degradation to BM25-only results.
    pub semantic_required: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: None,
            category: None,
            semantic_required: false,
        }
    }
}

#[derive(Clone)]
pub struct SearchPipeline {
    learnings: LearningRepo,
    edges: EdgeRepo,
    embedder: Arc<dyn EmbeddingProvider>,
    expander: Arc<dyn QueryExpander>,
    reranker: Arc<dyn Reranker>,
}

impl SearchPipeline {
    pub fn new(
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        expander: Arc<dyn QueryExpander>,
        reranker: Arc<dyn Reranker>,
    ) -> Self {
        Self {
            learnings: LearningRepo::new(pool.clone()),
            edges: EdgeRepo::new(pool),
            embedder,
            expander,
            reranker,
        }
    }

    /// Run the full pipeline for a query.
    pub async fn search(&self, query: &str, opts: &SearchOptions) -> TxResult<Vec<ScoredLearning>> {
        let limit = opts.limit.clamp(1, 100);
        if query.trim().is_empty() {
            return self.recent(limit, opts).await;
        }
        if opts.semantic_required && !self.embedder.is_enabled() {
            return Err(TxError::ServiceUnavailable(
                "embedding provider is offline".to_string(),
            ));
        }

        // 1. Expansion; any failure degrades to the original query alone.
        let raw_variants = match self.expander.expand(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query expansion failed, using original query");
                Vec::new()
            }
        };
        let variants = expansion::sanitize_variants(query, raw_variants);

        // 2. Parallel retrieval: both modalities fan out over the variants.
        let (bm25_lists, vector_lists) =
            futures::join!(self.lexical_lists(&variants), self.dense_lists(&variants));
        let bm25_lists = bm25_lists?;
        let vector_lists = vector_lists?;

        // 3. Reciprocal rank fusion.
        let fused = fusion::fuse(&bm25_lists, &vector_lists);
        if fused.is_empty() {
            return Ok(Vec::new());
        }

        // 4. Relevance assembly.
        let mut scored = self.score(fused, opts).await?;
        scored.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.learning.id.cmp(&b.learning.id))
        });

        // 5. Optional reranker over the head of the list.
        scored.truncate(limit * RERANK_MULTIPLE);
        let scored = self.apply_reranker(query, scored).await;

        // 6. MMR diversification with the category cap.
        let ids: Vec<i64> = scored.iter().map(|s| s.learning.id).collect();
        let embeddings: HashMap<i64, Vec<f32>> = self
            .learnings
            .embeddings_for(&ids)
            .await?
            .into_iter()
            .collect();
        let mut diversified = mmr::diversify(scored, &embeddings, mmr::MMR_LAMBDA, limit);

        // 7. Score floor, then the final cut.
        if let Some(min_score) = opts.min_score {
            diversified.retain(|s| s.relevance_score >= min_score);
        }
        diversified.truncate(limit);
        debug!(query, results = diversified.len(), "search complete");
        Ok(diversified)
    }

    /// Empty query: most recent learnings, relevance driven by recency.
    async fn recent(&self, limit: usize, opts: &SearchOptions) -> TxResult<Vec<ScoredLearning>> {
        let now = now_ms();
        let mut out: Vec<ScoredLearning> = self
            .learnings
            .list_recent((limit * 2) as i64)
            .await?
            .into_iter()
            .filter(|l| match &opts.category {
                Some(cat) => l.category.as_deref() == Some(cat.as_str()),
                None => true,
            })
            .map(|learning| {
                let recency = recency_of(&learning, now);
                ScoredLearning {
                    relevance_score: scoring::W_RECENCY * recency,
                    bm25_score: 0.0,
                    vector_score: 0.0,
                    recency_score: recency,
                    rrf_score: 0.0,
                    bm25_rank: 0,
                    vector_rank: 0,
                    reranker_score: None,
                    learning,
                }
            })
            .collect();
        if let Some(min_score) = opts.min_score {
            out.retain(|s| s.relevance_score >= min_score);
        }
        out.truncate(limit);
        Ok(out)
    }

    async fn lexical_lists(&self, variants: &[String]) -> TxResult<Vec<Vec<(i64, f64)>>> {
        let mut lists = Vec::with_capacity(variants.len());
        for variant in variants {
            let Some(match_query) = super::tokenize::fts_match_query(variant) else {
                lists.push(Vec::new());
                continue;
            };
            lists.push(
                self.learnings
                    .search_bm25(&match_query, CANDIDATES_PER_LIST)
                    .await?,
            );
        }
        Ok(lists)
    }

    /// Embed each variant and rank every stored vector by cosine
    /// similarity. Provider failures degrade to no dense lists; the main
    /// search path still answers from BM25.
    async fn dense_lists(&self, variants: &[String]) -> TxResult<Vec<Vec<(i64, f64)>>> {
        if !self.embedder.is_enabled() {
            return Ok(Vec::new());
        }
        let stored = self.learnings.embeddings().await?;
        if stored.is_empty() {
            return Ok(Vec::new());
        }
        let mut lists = Vec::with_capacity(variants.len());
        for variant in variants {
            let vector = match self.embedder.embed(variant).await {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "variant embedding failed, skipping dense list");
                    continue;
                }
            };
            let mut ranked: Vec<(i64, f64)> = stored
                .iter()
                .map(|(id, stored_vec)| (*id, cosine_similarity(&vector, stored_vec)))
                .collect();
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.cmp(&b.0))
            });
            ranked.truncate(CANDIDATES_PER_LIST as usize);
            lists.push(ranked);
        }
        Ok(lists)
    }

    async fn score(
        &self,
        fused: Vec<fusion::FusedCandidate>,
        opts: &SearchOptions,
    ) -> TxResult<Vec<ScoredLearning>> {
        let ids: Vec<i64> = fused.iter().map(|c| c.id).collect();
        let mut learnings: HashMap<i64, Learning> = self
            .learnings
            .fetch_many(&ids)
            .await?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();
        let feedback = self.edges.usage_stats_many(&ids).await?;
        let max_rrf = fused
            .iter()
            .map(|c| c.rrf_score)
            .fold(0.0f64, f64::max)
            .max(f64::MIN_POSITIVE);
        let now = now_ms();

        let mut out = Vec::with_capacity(fused.len());
        for candidate in fused {
            let Some(learning) = learnings.remove(&candidate.id) else {
                continue; // deleted since retrieval
            };
            if let Some(category) = &opts.category {
                if learning.category.as_deref() != Some(category.as_str()) {
                    continue;
                }
            }
            let rrf_norm = candidate.rrf_score / max_rrf;
            let recency = recency_of(&learning, now);
            let outcome_boost = learning.outcome_score.unwrap_or(0.0);
            let (helpful, total) = feedback.get(&candidate.id).copied().unwrap_or((0, 0));
            let feedback_score = bayesian_score(helpful, total);
            out.push(ScoredLearning {
                relevance_score: scoring::relevance(rrf_norm, recency, outcome_boost, feedback_score),
                bm25_score: candidate.bm25_score,
                vector_score: candidate.vector_score,
                recency_score: recency,
                rrf_score: candidate.rrf_score,
                bm25_rank: candidate.bm25_rank,
                vector_rank: candidate.vector_rank,
                reranker_score: None,
                learning,
            });
        }
        Ok(out)
    }

    /// Hand the head of the list to the reranker; on any failure the
    /// relevance order stands.
    async fn apply_reranker(
        &self,
        query: &str,
        scored: Vec<ScoredLearning>,
    ) -> Vec<ScoredLearning> {
        let documents: Vec<(i64, String)> = scored
            .iter()
            .map(|s| (s.learning.id, s.learning.content.clone()))
            .collect();
        let reply = match self.reranker.rerank(query, &documents).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "reranker failed, keeping relevance order");
                None
            }
        };
        let Some(order) = reply else {
            return scored;
        };
        let mut by_id: HashMap<i64, ScoredLearning> =
            scored.into_iter().map(|s| (s.learning.id, s)).collect();
        let mut out = Vec::with_capacity(by_id.len());
        for (id, reranker_score) in order {
            if let Some(mut item) = by_id.remove(&id) {
                item.reranker_score = Some(reranker_score);
                out.push(item);
            }
        }
        // Anything the reranker dropped keeps its relative position at the tail.
        let mut rest: Vec<ScoredLearning> = by_id.into_values().collect();
        rest.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.learning.id.cmp(&b.learning.id))
        });
        out.extend(rest);
        out
    }
}

fn recency_of(learning: &Learning, now_ms: i64) -> f64 {
    let age_ms = (now_ms - learning.created_at.timestamp_millis()).max(0);
    scoring::recency_score(age_ms as f64 / 86_400_000.0)
}
