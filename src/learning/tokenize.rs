//! Tokenization helpers shared by keyword extraction, FTS query building,
//! and anchor similarity checks.

use std::collections::HashSet;

/// Words that carry no retrieval signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "if",
    "in", "into", "is", "it", "its", "not", "of", "on", "or", "that", "the", "their", "then",
    "there", "these", "this", "to", "was", "were", "when", "which", "will", "with", "you", "your",
];

/// Default cap on extracted keywords per learning.
pub const KEYWORD_CAP: usize = 16;

/// Lowercased alphanumeric tokens, in order of appearance.
pub fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// The token set, for Jaccard similarity.
pub fn token_set(text: &str) -> HashSet<String> {
    tokens(text).into_iter().collect()
}

/// Extract up to `cap` keywords: tokens of at least three characters with
/// stopwords removed, deduplicated, first occurrence wins.
pub fn keywords(content: &str, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in tokens(content) {
        if token.len() < 3 || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        if seen.insert(token.clone()) {
            out.push(token);
            if out.len() >= cap {
                break;
            }
        }
    }
    out
}

/// Build an FTS5 MATCH expression from free text: each token quoted and
/// OR-joined so arbitrary input can never inject FTS syntax. Returns None
/// when no token survives.
pub fn fts_match_query(text: &str) -> Option<String> {
    let toks = tokens(text);
    if toks.is_empty() {
        return None;
    }
    Some(
        toks.iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Jaccard similarity of two token sets. Two empty sets are identical.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let sa = token_set(a);
    let sb = token_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.len() + sb.len() - intersection;
    if union == 0 {
        return 1.0;
    }
    intersection as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_split_and_lowercase() {
        assert_eq!(
            tokens("Use prepared-statements, ALWAYS!"),
            vec!["use", "prepared", "statements", "always"]
        );
    }

    #[test]
    fn test_keywords_filter_stopwords_and_short() {
        let kws = keywords("the fix is to retry on a timeout", 10);
        assert_eq!(kws, vec!["fix", "retry", "timeout"]);
    }

    #[test]
    fn test_keywords_cap_and_dedup() {
        let kws = keywords("alpha beta alpha gamma beta delta", 3);
        assert_eq!(kws, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_fts_match_query_quotes_tokens() {
        assert_eq!(
            fts_match_query("drop; \"table\"").as_deref(),
            Some("\"drop\" OR \"table\"")
        );
        assert!(fts_match_query("  --  ").is_none());
    }

    #[test]
    fn test_jaccard() {
        // Whitespace-only edits keep the token set identical.
        assert_eq!(
            jaccard_similarity(
                "function foo(a,b){return a+b;}",
                "function foo(a,b){ return a+b; }"
            ),
            1.0
        );
        assert_eq!(jaccard_similarity("a b c d", "a b c d"), 1.0);
        assert!(jaccard_similarity("alpha beta", "gamma delta") < 0.01);
        let half = jaccard_similarity("one two three", "one two four");
        assert!((half - 0.5).abs() < 1e-9);
    }
}
