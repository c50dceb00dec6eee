//! Integration tests for the anchor subsystem: self-healing, drift,
//! restore round-trips, pinning, lazy verification, and pruning.

mod common;

use common::test_ctx;
use tx_core::anchor::verify::sha256_hex;
use tx_core::errors::TxError;
use tx_core::model::anchor::{AnchorStatus, AnchorType, DetectedBy, NewAnchor};
use tx_core::model::learning::NewLearning;

async fn learning_id(ctx: &tx_core::app::AppContext) -> i64 {
    ctx.store
        .create(NewLearning {
            content: "the foo helper must stay additive".to_string(),
            ..Default::default()
        })
        .await
        .expect("learning")
        .id
}

fn hash_anchor(learning_id: i64, file: &str) -> NewAnchor {
    NewAnchor {
        learning_id,
        anchor_type: AnchorType::Hash,
        file_path: file.to_string(),
        anchor_value: file.to_string(),
        content_hash: None,
        content_preview: None,
        symbol_name: None,
        line_start: None,
        line_end: None,
        pinned: false,
    }
}

#[tokio::test]
async fn hash_anchor_self_heals_on_whitespace_edit() {
    let (ctx, dir) = test_ctx().await;
    let lid = learning_id(&ctx).await;

    let old_body = "function foo(a,b){return a+b;}";
    std::fs::write(dir.path().join("x.ts"), old_body).expect("write");
    let anchor = ctx
        .anchors
        .create(hash_anchor(lid, "x.ts"))
        .await
        .expect("anchor");
    assert_eq!(anchor.status, AnchorStatus::Valid);
    assert_eq!(
        anchor.content_hash.as_deref(),
        Some(sha256_hex(old_body.as_bytes()).as_str()),
        "creation captures the current region hash"
    );

    // Whitespace-only edit: token set unchanged.
    let new_body = "function foo(a,b){ return a+b; }";
    std::fs::write(dir.path().join("x.ts"), new_body).expect("rewrite");

    let healed = ctx
        .anchors
        .verify(anchor.id, DetectedBy::Agent)
        .await
        .expect("verify");
    assert_eq!(healed.status, AnchorStatus::Valid, "self-heal keeps it valid");
    assert_eq!(
        healed.content_hash.as_deref(),
        Some(sha256_hex(new_body.as_bytes()).as_str()),
        "stored hash updated to the new content"
    );
    assert_eq!(healed.content_preview.as_deref(), Some(new_body));

    let history = ctx.anchors.history(anchor.id, 10).await.expect("history");
    assert_eq!(history.len(), 1, "exactly one log row for the heal");
    assert_eq!(history[0].reason, "self_healed");
    assert_eq!(history[0].similarity_score, Some(1.0));
    assert_eq!(history[0].detected_by, DetectedBy::Agent);
}

#[tokio::test]
async fn hash_anchor_drifts_and_restores() {
    let (ctx, dir) = test_ctx().await;
    let lid = learning_id(&ctx).await;

    let old_body = "function foo(a,b){return a+b;}";
    std::fs::write(dir.path().join("x.ts"), old_body).expect("write");
    let anchor = ctx
        .anchors
        .create(hash_anchor(lid, "x.ts"))
        .await
        .expect("anchor");
    let original_hash = anchor.content_hash.clone();

    // Full rewrite: tokens change beyond the heal threshold.
    std::fs::write(
        dir.path().join("x.ts"),
        "export const sum = (xs) => xs.reduce((m, v) => m + v, 0);",
    )
    .expect("rewrite");

    let drifted = ctx
        .anchors
        .verify(anchor.id, DetectedBy::Periodic)
        .await
        .expect("verify");
    assert_eq!(drifted.status, AnchorStatus::Drifted);
    assert_eq!(drifted.content_hash, original_hash, "stored hash untouched on drift");

    let history = ctx.anchors.history(anchor.id, 10).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].reason, "hash_mismatch");
    assert!(history[0].similarity_score.unwrap_or(1.0) < 0.8);

    // Restore rewinds to the logged prior state and logs the rewind.
    let restored = ctx.anchors.restore(anchor.id).await.expect("restore");
    assert_eq!(restored.status, AnchorStatus::Valid);
    assert_eq!(restored.content_hash, original_hash);
    let history = ctx.anchors.history(anchor.id, 10).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].reason, "restore");
    assert_eq!(history[0].detected_by, DetectedBy::Manual);
}

#[tokio::test]
async fn glob_symbol_and_line_range_verification() {
    let (ctx, dir) = test_ctx().await;
    let lid = learning_id(&ctx).await;
    std::fs::write(
        dir.path().join("lib.rs"),
        "pub fn acquire_claim() {}\nline two\nline three\n",
    )
    .expect("write");

    let glob_anchor = ctx
        .anchors
        .create(NewAnchor {
            learning_id: lid,
            anchor_type: AnchorType::Glob,
            file_path: "*.rs".to_string(),
            anchor_value: "*.rs".to_string(),
            content_hash: None,
            content_preview: None,
            symbol_name: None,
            line_start: None,
            line_end: None,
            pinned: false,
        })
        .await
        .expect("glob anchor");
    let verified = ctx
        .anchors
        .verify(glob_anchor.id, DetectedBy::Agent)
        .await
        .expect("verify");
    assert_eq!(verified.status, AnchorStatus::Valid);

    let symbol_anchor = ctx
        .anchors
        .create(NewAnchor {
            learning_id: lid,
            anchor_type: AnchorType::Symbol,
            file_path: "lib.rs".to_string(),
            anchor_value: "acquire_claim".to_string(),
            content_hash: None,
            content_preview: None,
            symbol_name: Some("acquire_claim".to_string()),
            line_start: None,
            line_end: None,
            pinned: false,
        })
        .await
        .expect("symbol anchor");
    let verified = ctx
        .anchors
        .verify(symbol_anchor.id, DetectedBy::Agent)
        .await
        .expect("verify");
    assert_eq!(verified.status, AnchorStatus::Valid);

    let range_anchor = ctx
        .anchors
        .create(NewAnchor {
            learning_id: lid,
            anchor_type: AnchorType::LineRange,
            file_path: "lib.rs".to_string(),
            anchor_value: "1-3".to_string(),
            content_hash: None,
            content_preview: None,
            symbol_name: None,
            line_start: Some(1),
            line_end: Some(3),
            pinned: false,
        })
        .await
        .expect("range anchor");

    // Shrink the file below the range.
    std::fs::write(dir.path().join("lib.rs"), "only line\n").expect("shrink");
    let drifted = ctx
        .anchors
        .verify(range_anchor.id, DetectedBy::GitHook)
        .await
        .expect("verify");
    assert_eq!(drifted.status, AnchorStatus::Drifted);

    // The symbol is gone too now.
    let invalid = ctx
        .anchors
        .verify(symbol_anchor.id, DetectedBy::GitHook)
        .await
        .expect("verify");
    assert_eq!(invalid.status, AnchorStatus::Invalid);
}

#[tokio::test]
async fn pinned_anchors_skip_automatic_transitions() {
    let (ctx, dir) = test_ctx().await;
    let lid = learning_id(&ctx).await;
    std::fs::write(dir.path().join("pin.rs"), "original body here").expect("write");

    let mut new = hash_anchor(lid, "pin.rs");
    new.pinned = true;
    let anchor = ctx.anchors.create(new).await.expect("anchor");

    std::fs::write(dir.path().join("pin.rs"), "entirely new unrelated content").expect("rewrite");

    // Automatic triggers leave the pinned anchor untouched.
    let untouched = ctx
        .anchors
        .verify(anchor.id, DetectedBy::Periodic)
        .await
        .expect("verify");
    assert_eq!(untouched.status, AnchorStatus::Valid);
    assert!(ctx.anchors.history(anchor.id, 10).await.expect("history").is_empty());

    // A manual check still applies.
    let drifted = ctx
        .anchors
        .verify(anchor.id, DetectedBy::Manual)
        .await
        .expect("verify");
    assert_eq!(drifted.status, AnchorStatus::Drifted);
}

#[tokio::test]
async fn lazy_verification_respects_ttl() {
    let (ctx, dir) = test_ctx().await;
    let lid = learning_id(&ctx).await;
    std::fs::write(dir.path().join("ttl.rs"), "stable body").expect("write");
    let anchor = ctx
        .anchors
        .create(hash_anchor(lid, "ttl.rs"))
        .await
        .expect("anchor");
    assert!(anchor.verified_at.is_none(), "creation does not verify");

    let first = ctx
        .anchors
        .verify_fresh(anchor.id, DetectedBy::Lazy)
        .await
        .expect("first check");
    let verified_at = first.verified_at.expect("stamped");

    // Inside the TTL the stored result is reused even after a rewrite.
    std::fs::write(dir.path().join("ttl.rs"), "totally different").expect("rewrite");
    let cached = ctx
        .anchors
        .verify_fresh(anchor.id, DetectedBy::Lazy)
        .await
        .expect("cached check");
    assert_eq!(cached.verified_at, Some(verified_at));
    assert_eq!(cached.status, AnchorStatus::Valid);
}

#[tokio::test]
async fn prune_removes_only_old_invalid_anchors() {
    let (ctx, dir) = test_ctx().await;
    let lid = learning_id(&ctx).await;
    std::fs::write(dir.path().join("keep.rs"), "body").expect("write");

    let valid = ctx
        .anchors
        .create(hash_anchor(lid, "keep.rs"))
        .await
        .expect("valid anchor");
    let doomed = ctx
        .anchors
        .create(hash_anchor(lid, "keep.rs"))
        .await
        .expect("doomed anchor");

    // Invalidate by removing the file, then backdate the transition far
    // past the prune horizon.
    std::fs::remove_file(dir.path().join("keep.rs")).expect("rm");
    let invalid = ctx
        .anchors
        .verify(doomed.id, DetectedBy::Periodic)
        .await
        .expect("verify");
    assert_eq!(invalid.status, AnchorStatus::Invalid);
    let ancient = tx_core::storage::now_ms() - 100i64 * 86_400_000;
    sqlx::query("UPDATE anchors SET updated_at = ? WHERE id = ?")
        .bind(ancient)
        .bind(doomed.id)
        .execute(&ctx.pool)
        .await
        .expect("backdate");
    // Backdate the valid anchor too: age alone must never prune it.
    sqlx::query("UPDATE anchors SET updated_at = ? WHERE id = ?")
        .bind(ancient)
        .bind(valid.id)
        .execute(&ctx.pool)
        .await
        .expect("backdate");

    let pruned = ctx.anchors.prune().await.expect("prune");
    assert_eq!(pruned, 1);
    assert!(matches!(
        ctx.anchors.get(doomed.id).await,
        Err(TxError::NotFound(..))
    ));
    assert!(ctx.anchors.get(valid.id).await.is_ok());
}

#[tokio::test]
async fn deleting_learning_invalidates_its_anchors() {
    let (ctx, dir) = test_ctx().await;
    let lid = learning_id(&ctx).await;
    std::fs::write(dir.path().join("owned.rs"), "body").expect("write");
    let anchor = ctx
        .anchors
        .create(hash_anchor(lid, "owned.rs"))
        .await
        .expect("anchor");

    ctx.store.delete(lid).await.expect("delete learning");
    assert!(matches!(
        ctx.anchors.get(anchor.id).await,
        Err(TxError::NotFound(..))
    ));
}
