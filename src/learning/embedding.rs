//! Embedding provider seam.
//!
//! Dense retrieval is optional: when no provider is configured the noop
//! implementation stands in and the pipeline degrades to BM25-only
//! results. The HTTP implementation speaks the OpenAI-compatible
//! `/embeddings` shape with a hard client timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::errors::{TxError, TxResult};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. `Ok(None)` means the provider is disabled or chose
    /// to skip this input; it is never an error.
    async fn embed(&self, text: &str) -> TxResult<Option<Vec<f32>>>;

    /// Whether dense retrieval is available at all.
    fn is_enabled(&self) -> bool;

    fn dimension(&self) -> usize;
}

/// Stand-in when no provider is configured.
pub struct NoopEmbedder;

#[async_trait]
impl EmbeddingProvider for NoopEmbedder {
    async fn embed(&self, _text: &str) -> TxResult<Option<Vec<f32>>> {
        Ok(None)
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn dimension(&self) -> usize {
        0
    }
}

/// OpenAI-compatible embeddings client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    dim: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    /// Build from config; returns None when no endpoint is configured.
    pub fn from_config(config: &EmbeddingConfig) -> Option<Self> {
        let url = config.url.clone()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .ok()?;
        Some(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dim: config.dim,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, text: &str) -> TxResult<Option<Vec<f32>>> {
        let mut request = self.client.post(&self.url).json(&serde_json::json!({
            "model": self.model,
            "input": text,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| TxError::ServiceUnavailable(format!("embedding provider: {e}")))?;
        if !response.status().is_success() {
            return Err(TxError::ServiceUnavailable(format!(
                "embedding provider returned {}",
                response.status()
            )));
        }
        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| TxError::ServiceUnavailable(format!("embedding provider: {e}")))?;
        let Some(row) = body.data.into_iter().next() else {
            return Ok(None);
        };
        if row.embedding.len() != self.dim {
            warn!(
                got = row.embedding.len(),
                want = self.dim,
                "embedding dimension mismatch, dropping vector"
            );
            return Ok(None);
        }
        Ok(Some(row.embedding))
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Cosine similarity in [-1, 1]; zero vectors and length mismatches score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identity_and_orthogonal() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.0f32, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_noop_embedder() {
        let noop = NoopEmbedder;
        assert!(!noop.is_enabled());
        assert_eq!(noop.embed("anything").await.unwrap(), None);
    }
}
