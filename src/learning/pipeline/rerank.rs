//! Optional cross-encoder reranker seam. The noop implementation leaves
//! the relevance order untouched, which is also the degradation path on
//! timeout or provider failure.

use async_trait::async_trait;

use crate::errors::TxResult;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Re-order the candidate documents for the query. `Ok(None)` leaves
    /// the order unchanged. Returned pairs are `(learning id, score)` in
    /// the new order; candidates missing from the reply keep their
    /// relative order after the re-ranked ones.
    async fn rerank(&self, query: &str, documents: &[(i64, String)])
        -> TxResult<Option<Vec<(i64, f64)>>>;
}

pub struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank(
        &self,
        _query: &str,
        _documents: &[(i64, String)],
    ) -> TxResult<Option<Vec<(i64, f64)>>> {
        Ok(None)
    }
}
