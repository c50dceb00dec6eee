//! Maximal marginal relevance diversification with a per-category cap on
//! the head of the list.

use std::collections::HashMap;

use crate::learning::embedding::cosine_similarity;
use crate::model::learning::ScoredLearning;

/// Trade-off between relevance and redundancy.
pub const MMR_LAMBDA: f64 = 0.7;

/// At most this many items per category...
pub const CATEGORY_CAP: usize = 2;
/// ...within the first this-many positions.
pub const CAP_WINDOW: usize = 5;

/// Select up to `limit` items: each step takes the candidate maximising
/// `lambda * relevance - (1 - lambda) * max_cos_sim(candidate, selected)`.
/// Candidates without an embedding carry no redundancy penalty, so with no
/// embeddings at all this degrades to relevance order. The category cap
/// holds over the first `CAP_WINDOW` positions either way; capped
/// candidates are deferred, not dropped, unless nothing else remains.
pub fn diversify(
    ranked: Vec<ScoredLearning>,
    embeddings: &HashMap<i64, Vec<f32>>,
    lambda: f64,
    limit: usize,
) -> Vec<ScoredLearning> {
    let mut remaining = ranked;
    let mut selected: Vec<ScoredLearning> = Vec::with_capacity(limit.min(remaining.len()));
    let mut head_counts: HashMap<String, usize> = HashMap::new();

    while selected.len() < limit && !remaining.is_empty() {
        let position = selected.len();
        let capped = |item: &ScoredLearning| {
            position < CAP_WINDOW
                && item
                    .learning
                    .category
                    .as_ref()
                    .is_some_and(|c| head_counts.get(c).copied().unwrap_or(0) >= CATEGORY_CAP)
        };
        let any_uncapped = remaining.iter().any(|item| !capped(item));

        let mut best_idx = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        for (idx, item) in remaining.iter().enumerate() {
            if any_uncapped && capped(item) {
                continue;
            }
            let redundancy = embeddings
                .get(&item.learning.id)
                .map(|vector| {
                    selected
                        .iter()
                        .filter_map(|s| embeddings.get(&s.learning.id))
                        .map(|other| cosine_similarity(vector, other))
                        .fold(0.0f64, f64::max)
                })
                .unwrap_or(0.0);
            let score = lambda * item.relevance_score - (1.0 - lambda) * redundancy;
            let better = score > best_score
                || (score == best_score && item.learning.id < remaining[best_idx].learning.id);
            if better {
                best_score = score;
                best_idx = idx;
            }
        }

        let picked = remaining.remove(best_idx);
        if position < CAP_WINDOW {
            if let Some(category) = &picked.learning.category {
                *head_counts.entry(category.clone()).or_insert(0) += 1;
            }
        }
        selected.push(picked);
    }
    selected
}
