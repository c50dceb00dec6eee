//! Reciprocal rank fusion over the per-variant lexical and dense lists.

use std::collections::HashMap;

/// The RRF smoothing constant.
pub const RRF_K: f64 = 60.0;

/// One candidate after fusion, carrying its best appearance in each
/// modality. Rank 0 means the candidate never appeared in that modality.
#[derive(Debug, Clone, Default)]
pub struct FusedCandidate {
    pub id: i64,
    pub rrf_score: f64,
    pub bm25_score: f64,
    pub vector_score: f64,
    pub bm25_rank: usize,
    pub vector_rank: usize,
}

/// Merge every `(id, score)` list. A candidate at 1-based rank `r` in any
/// list contributes `1 / (k + r)`; contributions accumulate across
/// variants and modalities. Output is ordered by fused score descending,
/// id ascending.
pub fn fuse(bm25_lists: &[Vec<(i64, f64)>], vector_lists: &[Vec<(i64, f64)>]) -> Vec<FusedCandidate> {
    let mut by_id: HashMap<i64, FusedCandidate> = HashMap::new();

    for list in bm25_lists {
        for (rank0, (id, score)) in list.iter().enumerate() {
            let rank = rank0 + 1;
            let entry = by_id.entry(*id).or_insert_with(|| FusedCandidate {
                id: *id,
                ..Default::default()
            });
            entry.rrf_score += 1.0 / (RRF_K + rank as f64);
            if entry.bm25_rank == 0 || rank < entry.bm25_rank {
                entry.bm25_rank = rank;
            }
            if *score > entry.bm25_score {
                entry.bm25_score = *score;
            }
        }
    }
    for list in vector_lists {
        for (rank0, (id, score)) in list.iter().enumerate() {
            let rank = rank0 + 1;
            let entry = by_id.entry(*id).or_insert_with(|| FusedCandidate {
                id: *id,
                ..Default::default()
            });
            entry.rrf_score += 1.0 / (RRF_K + rank as f64);
            if entry.vector_rank == 0 || rank < entry.vector_rank {
                entry.vector_rank = rank;
            }
            if *score > entry.vector_score {
                entry.vector_score = *score;
            }
        }
    }

    let mut out: Vec<FusedCandidate> = by_id.into_values().collect();
    out.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    out
}
