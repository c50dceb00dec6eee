//! Pure verification predicates, one per anchor type. Everything here
//! works on a project root and file contents; no database access, so the
//! whole matrix is testable with a temp directory.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::learning::tokenize::jaccard_similarity;
use crate::model::anchor::{Anchor, AnchorType};

/// Jaccard similarity at or above this heals a hash mismatch in place.
pub const SELF_HEAL_THRESHOLD: f64 = 0.8;

/// Stored preview length, in characters.
pub const PREVIEW_CHARS: usize = 500;

/// Outcome of checking one anchor against the working tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// Location checks out; nothing to change.
    Valid,
    /// Hash mismatched but the content is close enough to the stored
    /// preview; the anchor absorbs the new hash and preview.
    SelfHealed {
        new_hash: String,
        new_preview: String,
        similarity: f64,
    },
    /// Location moved or changed beyond recognition, but still plausible.
    Drifted {
        reason: String,
        new_hash: Option<String>,
        similarity: Option<f64>,
    },
    /// Location is gone.
    Invalid { reason: String },
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// First `PREVIEW_CHARS` characters of the anchored region.
pub fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// The region a hash anchor covers: the line range when set, else the
/// whole file. Lines are 1-indexed and inclusive.
pub fn region_of(content: &str, line_start: Option<i64>, line_end: Option<i64>) -> String {
    match (line_start, line_end) {
        (Some(start), Some(end)) if start >= 1 && end >= start => {
            let lines: Vec<&str> = content.lines().collect();
            let from = (start - 1) as usize;
            let to = (end as usize).min(lines.len());
            if from >= lines.len() {
                return String::new();
            }
            lines[from..to].join("\n")
        }
        _ => content.to_string(),
    }
}

/// Dispatch on the anchor type.
pub fn verify(root: &Path, anchor: &Anchor) -> Verification {
    match anchor.anchor_type {
        AnchorType::Glob => verify_glob(root, &anchor.anchor_value),
        AnchorType::Hash => verify_hash(root, anchor),
        AnchorType::Symbol => verify_symbol(root, anchor),
        AnchorType::LineRange => verify_line_range(root, anchor),
    }
}

/// Glob anchors are valid while the pattern matches at least one file.
pub fn verify_glob(root: &Path, pattern: &str) -> Verification {
    let full = root.join(pattern);
    let Some(pattern_str) = full.to_str() else {
        return Verification::Invalid {
            reason: "unrepresentable glob pattern".to_string(),
        };
    };
    match glob::glob(pattern_str) {
        Ok(paths) => {
            for entry in paths.flatten() {
                if entry.exists() {
                    return Verification::Valid;
                }
            }
            Verification::Invalid {
                reason: "no files match pattern".to_string(),
            }
        }
        Err(e) => Verification::Invalid {
            reason: format!("bad glob pattern: {e}"),
        },
    }
}

/// Hash anchors: recompute SHA-256 of the referenced region and compare;
/// near-matches against the stored preview self-heal.
pub fn verify_hash(root: &Path, anchor: &Anchor) -> Verification {
    let Some(stored_hash) = &anchor.content_hash else {
        return Verification::Invalid {
            reason: "no stored content hash".to_string(),
        };
    };
    let Ok(content) = std::fs::read_to_string(resolve(root, &anchor.file_path)) else {
        return Verification::Invalid {
            reason: "file missing or unreadable".to_string(),
        };
    };
    let region = region_of(&content, anchor.line_start, anchor.line_end);
    let new_hash = sha256_hex(region.as_bytes());
    if &new_hash == stored_hash {
        return Verification::Valid;
    }
    let similarity = anchor
        .content_preview
        .as_deref()
        .map(|preview| jaccard_similarity(&region, preview));
    match similarity {
        Some(similarity) if similarity >= SELF_HEAL_THRESHOLD => Verification::SelfHealed {
            new_hash,
            new_preview: preview_of(&region),
            similarity,
        },
        _ => Verification::Drifted {
            reason: "hash_mismatch".to_string(),
            new_hash: Some(new_hash),
            similarity,
        },
    }
}

/// Declaration keywords searched ahead of a bare word match.
const DECLARATION_KEYWORDS: &[&str] = &[
    "fn", "struct", "enum", "trait", "impl", "type", "const", "static", "mod", "class",
    "function", "def", "interface", "let", "var", "export",
];

/// Symbol anchors: the (escaped) name must still appear on a
/// declaration-shaped line. A bare mention in a comment or string does
/// not count.
pub fn verify_symbol(root: &Path, anchor: &Anchor) -> Verification {
    let name = anchor
        .symbol_name
        .as_deref()
        .unwrap_or(&anchor.anchor_value)
        .trim();
    if name.is_empty() {
        return Verification::Invalid {
            reason: "empty symbol name".to_string(),
        };
    }
    let Ok(content) = std::fs::read_to_string(resolve(root, &anchor.file_path)) else {
        return Verification::Invalid {
            reason: "file missing or unreadable".to_string(),
        };
    };
    for line in content.lines() {
        if line_contains_word(line, name)
            && DECLARATION_KEYWORDS
                .iter()
                .any(|kw| line_contains_word(line, kw))
        {
            return Verification::Valid;
        }
    }
    Verification::Invalid {
        reason: "symbol declaration not found".to_string(),
    }
}

/// Line-range anchors: valid while the file still has `line_end` lines.
pub fn verify_line_range(root: &Path, anchor: &Anchor) -> Verification {
    let Some(end) = anchor.line_end else {
        return Verification::Invalid {
            reason: "no line range stored".to_string(),
        };
    };
    let Ok(content) = std::fs::read_to_string(resolve(root, &anchor.file_path)) else {
        return Verification::Invalid {
            reason: "file missing or unreadable".to_string(),
        };
    };
    let lines = content.lines().count() as i64;
    if lines >= end {
        Verification::Valid
    } else {
        Verification::Drifted {
            reason: format!("file has {lines} lines, range ends at {end}"),
            new_hash: None,
            similarity: None,
        }
    }
}

fn resolve(root: &Path, file_path: &str) -> PathBuf {
    let path = Path::new(file_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Whole-word containment without regex: the symbol is escaped by
/// construction because only identifier characters count as word chars.
fn line_contains_word(line: &str, word: &str) -> bool {
    line.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|token| token == word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).expect("write fixture");
    }

    fn hash_anchor(file: &str, hash: &str, preview: &str) -> Anchor {
        let now = chrono::Utc::now();
        Anchor {
            id: 1,
            learning_id: 1,
            anchor_type: AnchorType::Hash,
            file_path: file.to_string(),
            anchor_value: file.to_string(),
            content_hash: Some(hash.to_string()),
            content_preview: Some(preview.to_string()),
            symbol_name: None,
            line_start: None,
            line_end: None,
            status: crate::model::anchor::AnchorStatus::Valid,
            pinned: false,
            verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_glob_matches_and_misses() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "main.rs", "fn main() {}");
        assert_eq!(verify_glob(dir.path(), "*.rs"), Verification::Valid);
        assert!(matches!(
            verify_glob(dir.path(), "*.py"),
            Verification::Invalid { .. }
        ));
    }

    #[test]
    fn test_hash_exact_match_is_valid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let body = "function foo(a,b){return a+b;}";
        write(dir.path(), "x.ts", body);
        let anchor = hash_anchor("x.ts", &sha256_hex(body.as_bytes()), body);
        assert_eq!(verify_hash(dir.path(), &anchor), Verification::Valid);
    }

    #[test]
    fn test_hash_whitespace_edit_self_heals() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = "function foo(a,b){return a+b;}";
        let new = "function foo(a,b){ return a+b; }";
        write(dir.path(), "x.ts", new);
        let anchor = hash_anchor("x.ts", &sha256_hex(old.as_bytes()), old);
        match verify_hash(dir.path(), &anchor) {
            Verification::SelfHealed {
                new_hash,
                similarity,
                ..
            } => {
                assert_eq!(new_hash, sha256_hex(new.as_bytes()));
                assert_eq!(similarity, 1.0);
            }
            other => panic!("expected self-heal, got {other:?}"),
        }
    }

    #[test]
    fn test_hash_rewrite_drifts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = "function foo(a,b){return a+b;}";
        write(dir.path(), "x.ts", "completely different implementation now");
        let anchor = hash_anchor("x.ts", &sha256_hex(old.as_bytes()), old);
        assert!(matches!(
            verify_hash(dir.path(), &anchor),
            Verification::Drifted { .. }
        ));
    }

    #[test]
    fn test_hash_missing_file_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let anchor = hash_anchor("gone.ts", "abc", "body");
        assert!(matches!(
            verify_hash(dir.path(), &anchor),
            Verification::Invalid { .. }
        ));
    }

    #[test]
    fn test_region_extraction() {
        let content = "one\ntwo\nthree\nfour";
        assert_eq!(region_of(content, Some(2), Some(3)), "two\nthree");
        assert_eq!(region_of(content, None, None), content);
        assert_eq!(region_of(content, Some(10), Some(12)), "");
        // End past EOF clamps.
        assert_eq!(region_of(content, Some(4), Some(9)), "four");
    }

    #[test]
    fn test_symbol_presence() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "lib.rs",
            "// acquire_claim drains the queue here\npub fn acquire_claim() {}\nstruct Claim;\n",
        );
        let now = chrono::Utc::now();
        let mut anchor = Anchor {
            id: 1,
            learning_id: 1,
            anchor_type: AnchorType::Symbol,
            file_path: "lib.rs".to_string(),
            anchor_value: "acquire_claim".to_string(),
            content_hash: None,
            content_preview: None,
            symbol_name: Some("acquire_claim".to_string()),
            line_start: None,
            line_end: None,
            status: crate::model::anchor::AnchorStatus::Valid,
            pinned: false,
            verified_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(verify_symbol(dir.path(), &anchor), Verification::Valid);

        // Substrings must not count as the symbol.
        anchor.symbol_name = Some("acquire".to_string());
        assert!(matches!(
            verify_symbol(dir.path(), &anchor),
            Verification::Invalid { .. }
        ));

        anchor.symbol_name = Some("  ".to_string());
        assert!(matches!(
            verify_symbol(dir.path(), &anchor),
            Verification::Invalid { .. }
        ));
    }

    #[test]
    fn test_symbol_mention_without_declaration_is_invalid() {
        let dir = tempfile::tempdir().expect("tempdir");
        // The name survives only in prose; the declaration is gone.
        write(
            dir.path(),
            "notes.rs",
            "// acquire_claim used to live in this file\n\"callers invoke acquire_claim\"\n",
        );
        let now = chrono::Utc::now();
        let anchor = Anchor {
            id: 1,
            learning_id: 1,
            anchor_type: AnchorType::Symbol,
            file_path: "notes.rs".to_string(),
            anchor_value: "acquire_claim".to_string(),
            content_hash: None,
            content_preview: None,
            symbol_name: Some("acquire_claim".to_string()),
            line_start: None,
            line_end: None,
            status: crate::model::anchor::AnchorStatus::Valid,
            pinned: false,
            verified_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(
            verify_symbol(dir.path(), &anchor),
            Verification::Invalid { .. }
        ));
    }

    #[test]
    fn test_line_range_shrinking_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "short.rs", "one\ntwo\n");
        let now = chrono::Utc::now();
        let mut anchor = Anchor {
            id: 1,
            learning_id: 1,
            anchor_type: AnchorType::LineRange,
            file_path: "short.rs".to_string(),
            anchor_value: "1-2".to_string(),
            content_hash: None,
            content_preview: None,
            symbol_name: None,
            line_start: Some(1),
            line_end: Some(2),
            status: crate::model::anchor::AnchorStatus::Valid,
            pinned: false,
            verified_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(verify_line_range(dir.path(), &anchor), Verification::Valid);

        anchor.line_end = Some(5);
        assert!(matches!(
            verify_line_range(dir.path(), &anchor),
            Verification::Drifted { .. }
        ));

        anchor.file_path = "missing.rs".to_string();
        assert!(matches!(
            verify_line_range(dir.path(), &anchor),
            Verification::Invalid { .. }
        ));
    }
}
