//! Integration tests for the learning store and the retrieval pipeline
//! with every collaborator at its noop: BM25 retrieval, outcome and
//! feedback ranking, empty-query behavior, and index consistency.

mod common;

use common::{make_task, test_ctx};
use tx_core::errors::TxError;
use tx_core::learning::SearchOptions;
use tx_core::model::learning::{NewLearning, SourceType};
use tx_core::model::run::NewRun;

fn learning(content: &str) -> NewLearning {
    NewLearning {
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn outcome_breaks_ties_between_identical_learnings() {
    let (ctx, _dir) = test_ctx().await;
    let l1 = ctx
        .store
        .create(learning("use prepared statements"))
        .await
        .expect("L1");
    let l2 = ctx
        .store
        .create(learning("use prepared statements"))
        .await
        .expect("L2");
    ctx.store.set_outcome(l2.id, 1.0).await.expect("outcome");

    let results = ctx
        .pipeline
        .search("prepared statements", &SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(results.len(), 2, "both learnings match");

    let r1 = results.iter().find(|r| r.learning.id == l1.id).expect("L1 in results");
    let r2 = results.iter().find(|r| r.learning.id == l2.id).expect("L2 in results");
    assert!(
        r2.relevance_score > r1.relevance_score,
        "outcome 1.0 must outrank the neutral twin"
    );
    assert!(r1.bm25_rank >= 1 && r2.bm25_rank >= 1);
    assert!(r1.rrf_score > 0.0);
}

#[tokio::test]
async fn search_only_matches_relevant_content() {
    let (ctx, _dir) = test_ctx().await;
    let hit = ctx
        .store
        .create(learning("retry transient sqlite busy errors with backoff"))
        .await
        .expect("hit");
    ctx.store
        .create(learning("always pin compiler versions in ci"))
        .await
        .expect("miss");

    let results = ctx
        .pipeline
        .search("sqlite busy retry", &SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].learning.id, hit.id);
    assert_eq!(results[0].bm25_rank, 1);
}

#[tokio::test]
async fn empty_query_returns_recent() {
    let (ctx, _dir) = test_ctx().await;
    let older = ctx.store.create(learning("older learning")).await.expect("older");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let newer = ctx.store.create(learning("newer learning")).await.expect("newer");

    let results = ctx
        .pipeline
        .search("", &SearchOptions::default())
        .await
        .expect("recent");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].learning.id, newer.id, "most recent first");
    assert_eq!(results[1].learning.id, older.id);
    assert!(results[0].recency_score >= results[1].recency_score);
}

#[tokio::test]
async fn min_score_and_category_filters() {
    let (ctx, _dir) = test_ctx().await;
    ctx.store
        .create(NewLearning {
            content: "database tip about indexes".to_string(),
            category: Some("db".to_string()),
            ..Default::default()
        })
        .await
        .expect("db learning");
    ctx.store
        .create(NewLearning {
            content: "database tip about sockets".to_string(),
            category: Some("net".to_string()),
            ..Default::default()
        })
        .await
        .expect("net learning");

    let db_only = ctx
        .pipeline
        .search(
            "database tip",
            &SearchOptions {
                category: Some("db".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("category search");
    assert_eq!(db_only.len(), 1);
    assert_eq!(db_only[0].learning.category.as_deref(), Some("db"));

    let none = ctx
        .pipeline
        .search(
            "database tip",
            &SearchOptions {
                min_score: Some(10.0),
                ..Default::default()
            },
        )
        .await
        .expect("min score");
    assert!(none.is_empty(), "an impossible floor filters everything");
}

#[tokio::test]
async fn semantic_required_without_provider_is_unavailable() {
    let (ctx, _dir) = test_ctx().await;
    ctx.store.create(learning("some content")).await.expect("learning");

    // The main path degrades to BM25-only.
    let ok = ctx
        .pipeline
        .search("content", &SearchOptions::default())
        .await
        .expect("degraded search");
    assert_eq!(ok.len(), 1);

    // Explicitly demanding semantics surfaces the outage.
    let err = ctx
        .pipeline
        .search(
            "content",
            &SearchOptions {
                semantic_required: true,
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(err, Err(TxError::ServiceUnavailable(_))));
}

#[tokio::test]
async fn feedback_edges_shift_ranking() {
    let (ctx, _dir) = test_ctx().await;
    let praised = ctx
        .store
        .create(learning("cache invalidation pattern alpha"))
        .await
        .expect("praised");
    let panned = ctx
        .store
        .create(learning("cache invalidation pattern beta"))
        .await
        .expect("panned");

    let run = ctx
        .runs
        .create(NewRun {
            agent: "coder".to_string(),
            task_id: None,
            pid: None,
            transcript_path: None,
        })
        .await
        .expect("run");
    ctx.feedback
        .record_usage(&run.id, &[(praised.id, true), (panned.id, false)])
        .await
        .expect("feedback");

    let high = ctx.feedback.feedback_score(praised.id).await.expect("score");
    let low = ctx.feedback.feedback_score(panned.id).await.expect("score");
    assert!((high - 2.0 / 3.0).abs() < 1e-9);
    assert!((low - 1.0 / 3.0).abs() < 1e-9);

    let results = ctx
        .pipeline
        .search("cache invalidation pattern", &SearchOptions::default())
        .await
        .expect("search");
    let first = &results[0];
    assert_eq!(first.learning.id, praised.id, "helpful feedback ranks first");
}

#[tokio::test]
async fn deleting_learning_clears_index_and_edges() {
    let (ctx, _dir) = test_ctx().await;
    let doomed = ctx
        .store
        .create(learning("ephemeral wisdom about flaky tests"))
        .await
        .expect("learning");

    let run = ctx
        .runs
        .create(NewRun {
            agent: "coder".to_string(),
            task_id: None,
            pid: None,
            transcript_path: None,
        })
        .await
        .expect("run");
    ctx.feedback
        .record_usage(&run.id, &[(doomed.id, true)])
        .await
        .expect("usage edge");

    let before = ctx
        .pipeline
        .search("flaky tests", &SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(before.len(), 1);

    assert!(ctx.store.delete(doomed.id).await.expect("delete"));
    // Idempotent: already gone.
    assert!(!ctx.store.delete(doomed.id).await.expect("redelete"));

    let after = ctx
        .pipeline
        .search("flaky tests", &SearchOptions::default())
        .await
        .expect("search");
    assert!(after.is_empty(), "deleted learnings leave the index");
    assert!(matches!(
        ctx.store.get(doomed.id).await,
        Err(TxError::NotFound(..))
    ));

    // Edges soft-delete: the row leaves the live view without vanishing.
    let edges = tx_core::repo::edges::EdgeRepo::new(ctx.pool.clone());
    let live = edges
        .live_from(
            tx_core::model::edge::NodeKind::Learning,
            &doomed.id.to_string(),
            tx_core::model::edge::EdgeType::UsedInRun,
        )
        .await
        .expect("live edges");
    assert!(live.is_empty(), "live view is empty after the delete");
    let (_, total) = edges.usage_stats(doomed.id).await.expect("stats");
    assert_eq!(total, 0, "feedback ignores invalidated edges");
}

#[tokio::test]
async fn file_learnings_listed_by_path() {
    let (ctx, _dir) = test_ctx().await;
    ctx.store
        .create(NewLearning {
            content: "this module needs the feature flag".to_string(),
            source_type: SourceType::File,
            source_ref: Some("src/flags.rs".to_string()),
            ..Default::default()
        })
        .await
        .expect("file learning");
    ctx.store
        .create(learning("unrelated manual learning"))
        .await
        .expect("manual");

    let for_file = ctx.store.by_file_path("src/flags.rs").await.expect("by path");
    assert_eq!(for_file.len(), 1);
    let for_other = ctx.store.by_file_path("src/other.rs").await.expect("by path");
    assert!(for_other.is_empty());
}

#[tokio::test]
async fn context_assembly_times_the_search() {
    let (ctx, _dir) = test_ctx().await;
    let task = make_task(&ctx, "fix login retry storm", 500).await;
    ctx.store
        .create(learning("login retries need jittered backoff"))
        .await
        .expect("learning");

    let context = ctx.assembler.get_context(&task.id).await.expect("context");
    assert_eq!(context.task_id, task.id);
    assert_eq!(context.task_title, "fix login retry storm");
    assert!(context.search_query.starts_with("fix login retry storm"));
    assert_eq!(context.learnings.len(), 1);

    assert!(matches!(
        ctx.assembler.get_context("tx-missing0").await,
        Err(TxError::NotFound(..))
    ));
}

#[tokio::test]
async fn keyword_extraction_defaults_apply() {
    let (ctx, _dir) = test_ctx().await;
    let l = ctx
        .store
        .create(learning("the scheduler skips claimed tasks during selection"))
        .await
        .expect("learning");
    assert!(l.keywords.contains(&"scheduler".to_string()));
    assert!(!l.keywords.contains(&"the".to_string()), "stopwords removed");

    let explicit = ctx
        .store
        .create(NewLearning {
            content: "something".to_string(),
            keywords: vec!["custom".to_string()],
            ..Default::default()
        })
        .await
        .expect("learning");
    assert_eq!(explicit.keywords, vec!["custom".to_string()]);
}
