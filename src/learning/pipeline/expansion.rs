//! Query expansion seam. An optional collaborator (usually LLM-backed)
//! turns one query into a handful of paraphrases; the pipeline retrieves
//! for every variant and fuses the lists.

use async_trait::async_trait;

use crate::errors::TxResult;

/// Upper bound on variants including the original.
pub const MAX_VARIANTS: usize = 6;

/// Variants longer than this are discarded outright.
pub const MAX_VARIANT_CHARS: usize = 500;

#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// Propose additional query variants. The pipeline sanitizes the
    /// result; implementations may return junk without breaking search.
    async fn expand(&self, query: &str) -> TxResult<Vec<String>>;
}

/// Default collaborator: no expansion.
pub struct NoopExpander;

#[async_trait]
impl QueryExpander for NoopExpander {
    async fn expand(&self, _query: &str) -> TxResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Normalize raw expander output: the exact original always comes first,
/// empty and oversized variants are dropped, duplicates are removed
/// case-insensitively, and the total is capped.
pub fn sanitize_variants(original: &str, raw: Vec<String>) -> Vec<String> {
    let mut out = vec![original.to_string()];
    let mut seen = vec![original.to_lowercase()];
    for variant in raw {
        let variant = variant.trim();
        if variant.is_empty() || variant.chars().count() > MAX_VARIANT_CHARS {
            continue;
        }
        let lowered = variant.to_lowercase();
        if seen.contains(&lowered) {
            continue;
        }
        seen.push(lowered);
        out.push(variant.to_string());
        if out.len() >= MAX_VARIANTS {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_original_always_first() {
        let v = sanitize_variants("retry timeout", vec!["backoff".to_string()]);
        assert_eq!(v, vec!["retry timeout", "backoff"]);
    }

    #[test]
    fn test_dedup_case_insensitive_and_trim() {
        let v = sanitize_variants(
            "Retry Timeout",
            vec![
                "retry timeout".to_string(),
                "  ".to_string(),
                " Exponential Backoff ".to_string(),
                "exponential backoff".to_string(),
            ],
        );
        assert_eq!(v, vec!["Retry Timeout", "Exponential Backoff"]);
    }

    #[test]
    fn test_oversize_discarded_and_capped() {
        let long = "x".repeat(MAX_VARIANT_CHARS + 1);
        let raw: Vec<String> = std::iter::once(long)
            .chain((0..10).map(|i| format!("variant {i}")))
            .collect();
        let v = sanitize_variants("q", raw);
        assert_eq!(v.len(), MAX_VARIANTS);
        assert_eq!(v[0], "q");
        assert!(v.iter().all(|s| s.chars().count() <= MAX_VARIANT_CHARS));
    }

    #[tokio::test]
    async fn test_noop_expander_yields_only_original() {
        let raw = NoopExpander.expand("q").await.unwrap();
        assert_eq!(sanitize_variants("q", raw), vec!["q"]);
    }
}
