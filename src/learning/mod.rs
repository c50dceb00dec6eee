//! Learning store and hybrid retrieval: BM25 over the full-text index and
//! cosine search over stored embeddings, fused by reciprocal rank fusion,
//! re-ranked by recency/outcome/feedback, and diversified by MMR.

pub mod embedding;
pub mod pipeline;
pub mod store;
pub mod tokenize;

pub use embedding::{EmbeddingProvider, HttpEmbedder, NoopEmbedder};
pub use pipeline::{SearchOptions, SearchPipeline};
pub use store::LearningStore;
