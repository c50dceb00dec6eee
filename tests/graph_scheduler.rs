//! Integration tests for the task graph engine and the ready scheduler:
//! the completion-unblocks-dependents scenario, cycle rejection, cascade
//! semantics, ordering, and optimistic locking.

mod common;

use common::{make_task, set_status, test_ctx};
use tx_core::errors::TxError;
use tx_core::model::task::{NewTask, TaskPatch, TaskStatus};

#[tokio::test]
async fn completion_unblocks_dependents() {
    let (ctx, _dir) = test_ctx().await;
    let a = make_task(&ctx, "A", 800).await;
    let b = make_task(&ctx, "B", 700).await;
    let c = make_task(&ctx, "C", 600).await;

    // A blocks B, B blocks C.
    ctx.engine.add_blocker(&b.id, &a.id).await.expect("A -> B");
    ctx.engine.add_blocker(&c.id, &b.id).await.expect("B -> C");

    let ready = ctx.scheduler.get_ready(10, true).await.expect("ready");
    let ids: Vec<&str> = ready.iter().map(|t| t.task.id.as_str()).collect();
    assert_eq!(ids, vec![a.id.as_str()], "only A is ready at the start");
    assert!(ready[0].is_ready);

    let outcome = ctx.engine.complete(&a.id).await.expect("done(A)");
    assert_eq!(outcome.task.status, TaskStatus::Done);
    assert!(outcome.task.completed_at.is_some());
    let now_ready: Vec<&str> = outcome.now_ready.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(now_ready, vec![b.id.as_str()]);

    let ready = ctx.scheduler.get_ready(10, true).await.expect("ready");
    let ids: Vec<&str> = ready.iter().map(|t| t.task.id.as_str()).collect();
    assert_eq!(ids, vec![b.id.as_str()]);
}

#[tokio::test]
async fn two_cycle_and_longer_cycles_rejected() {
    let (ctx, _dir) = test_ctx().await;
    let a = make_task(&ctx, "A", 500).await;
    let b = make_task(&ctx, "B", 500).await;
    let c = make_task(&ctx, "C", 500).await;

    // Self edge.
    assert!(matches!(
        ctx.engine.add_blocker(&a.id, &a.id).await,
        Err(TxError::Validation(_))
    ));

    // 2-cycle: A blocked by B, then B blocked by A.
    ctx.engine.add_blocker(&a.id, &b.id).await.expect("B -> A");
    assert!(matches!(
        ctx.engine.add_blocker(&b.id, &a.id).await,
        Err(TxError::CircularDependency(_))
    ));

    // 3-cycle: with B -> A and C -> B in place, A -> C closes the loop.
    ctx.engine.add_blocker(&b.id, &c.id).await.expect("C -> B");
    assert!(matches!(
        ctx.engine.add_blocker(&c.id, &a.id).await,
        Err(TxError::CircularDependency(_))
    ));

    // Duplicate edge insert is a no-op.
    let view = ctx.engine.add_blocker(&a.id, &b.id).await.expect("idempotent");
    assert_eq!(view.blockers, vec![b.id.clone()]);
}

#[tokio::test]
async fn transition_table_enforced() {
    let (ctx, _dir) = test_ctx().await;
    let t = make_task(&ctx, "lifecycle", 500).await;
    assert_eq!(t.status, TaskStatus::Backlog);

    // backlog -> review is illegal.
    let err = ctx
        .engine
        .update(
            &t.id,
            TaskPatch {
                status: Some(TaskStatus::Review),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(err, Err(TxError::IllegalTransition { .. })));

    // backlog -> active -> done stamps completed_at; reopen clears it.
    set_status(&ctx, &t.id, TaskStatus::Active).await;
    let done = set_status(&ctx, &t.id, TaskStatus::Done).await;
    assert!(done.completed_at.is_some());
    let reopened = set_status(&ctx, &t.id, TaskStatus::Active).await;
    assert!(reopened.completed_at.is_none());

    // done only reopens to active.
    set_status(&ctx, &t.id, TaskStatus::Done).await;
    let err = ctx
        .engine
        .update(
            &t.id,
            TaskPatch {
                status: Some(TaskStatus::Ready),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(err, Err(TxError::IllegalTransition { .. })));
}

#[tokio::test]
async fn delete_with_children_requires_cascade() {
    let (ctx, _dir) = test_ctx().await;
    let parent = make_task(&ctx, "parent", 500).await;
    let child = ctx
        .engine
        .create(NewTask {
            title: "child".to_string(),
            parent_id: Some(parent.id.clone()),
            ..Default::default()
        })
        .await
        .expect("child");

    assert!(matches!(
        ctx.engine.remove(&parent.id, false).await,
        Err(TxError::HasChildren(_))
    ));

    let deleted = ctx.engine.remove(&parent.id, true).await.expect("cascade");
    assert_eq!(deleted, 2);
    assert!(matches!(
        ctx.engine.get(&child.id).await,
        Err(TxError::NotFound(..))
    ));
}

#[tokio::test]
async fn reparent_to_descendant_rejected() {
    let (ctx, _dir) = test_ctx().await;
    let root = make_task(&ctx, "root", 500).await;
    let mid = ctx
        .engine
        .create(NewTask {
            title: "mid".to_string(),
            parent_id: Some(root.id.clone()),
            ..Default::default()
        })
        .await
        .expect("mid");
    let leaf = ctx
        .engine
        .create(NewTask {
            title: "leaf".to_string(),
            parent_id: Some(mid.id.clone()),
            ..Default::default()
        })
        .await
        .expect("leaf");

    let err = ctx
        .engine
        .update(
            &root.id,
            TaskPatch {
                parent_id: Some(Some(leaf.id.clone())),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(err, Err(TxError::CircularDependency(_))));

    // Detaching with an explicit null parent works.
    let detached = ctx
        .engine
        .update(
            &mid.id,
            TaskPatch {
                parent_id: Some(None),
                ..Default::default()
            },
        )
        .await
        .expect("detach");
    assert!(detached.parent_id.is_none());

    let tree = ctx.engine.get_tree(&mid.id).await.expect("tree");
    assert_eq!(tree.children.len(), 1);
    assert_eq!(tree.children[0].task.id, leaf.id);
}

#[tokio::test]
async fn listing_orders_and_paginates() {
    let (ctx, _dir) = test_ctx().await;
    let high = make_task(&ctx, "high", 900).await;
    let mid_a = make_task(&ctx, "mid a", 500).await;
    let mid_b = make_task(&ctx, "mid b", 500).await;
    let low = make_task(&ctx, "low", 100).await;

    let page1 = ctx
        .engine
        .list(None, None, None, None, 2)
        .await
        .expect("page 1");
    assert_eq!(page1.items.len(), 2);
    assert_eq!(page1.total, 4);
    assert!(page1.has_more);
    assert_eq!(page1.items[0].id, high.id);

    // Equal scores fall back to id ascending.
    let (first_mid, second_mid) = if mid_a.id < mid_b.id {
        (mid_a.id.clone(), mid_b.id.clone())
    } else {
        (mid_b.id.clone(), mid_a.id.clone())
    };
    assert_eq!(page1.items[1].id, first_mid);

    let cursor = page1.next_cursor.expect("cursor");
    let page2 = ctx
        .engine
        .list(None, None, None, Some(cursor), 2)
        .await
        .expect("page 2");
    let ids: Vec<&str> = page2.items.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec![second_mid.as_str(), low.id.as_str()]);
    assert!(!page2.has_more);
}

#[tokio::test]
async fn search_escapes_like_wildcards() {
    let (ctx, _dir) = test_ctx().await;
    make_task(&ctx, "migrate 100% of traffic", 500).await;
    make_task(&ctx, "unrelated", 500).await;

    let hits = ctx
        .engine
        .list(None, None, Some("100%".to_string()), None, 10)
        .await
        .expect("search");
    assert_eq!(hits.items.len(), 1);

    // A bare % must not act as a wildcard.
    let misses = ctx
        .engine
        .list(None, None, Some("%".to_string()), None, 10)
        .await
        .expect("search");
    assert_eq!(misses.items.len(), 1, "only the task containing a literal %");
}

#[tokio::test]
async fn update_many_detects_stale_rows() {
    let (ctx, _dir) = test_ctx().await;
    let t = make_task(&ctx, "contested", 500).await;
    let stale_read = t.updated_at;

    // Another writer bumps the row.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    set_status(&ctx, &t.id, TaskStatus::Ready).await;

    let err = ctx
        .engine
        .update_many(
            std::slice::from_ref(&t.id),
            Some(TaskStatus::Planning),
            None,
            Some(stale_read),
        )
        .await;
    assert!(matches!(err, Err(TxError::StaleData(_))));

    // A fresh read succeeds.
    let fresh = ctx.engine.get(&t.id).await.expect("reload");
    let updated = ctx
        .engine
        .update_many(
            std::slice::from_ref(&t.id),
            Some(TaskStatus::Planning),
            Some(640),
            Some(fresh.updated_at),
        )
        .await
        .expect("bulk update");
    assert_eq!(updated[0].status, TaskStatus::Planning);
    assert_eq!(updated[0].score, 640);
}

#[tokio::test]
async fn ancestors_and_descendants_bounded() {
    let (ctx, _dir) = test_ctx().await;
    let root = make_task(&ctx, "d0", 500).await;
    let mut parent = root.id.clone();
    let mut chain = vec![root.id.clone()];
    for depth in 1..5 {
        let t = ctx
            .engine
            .create(NewTask {
                title: format!("d{depth}"),
                parent_id: Some(parent.clone()),
                ..Default::default()
            })
            .await
            .expect("chain task");
        parent = t.id.clone();
        chain.push(t.id);
    }

    let ancestors = ctx.engine.get_ancestors(&parent).await.expect("ancestors");
    assert_eq!(ancestors.len(), 4);
    // Nearest ancestor first.
    assert_eq!(ancestors[0].id, chain[3]);
    assert_eq!(ancestors[3].id, chain[0]);

    let descendants = ctx.engine.get_descendants(&root.id).await.expect("descendants");
    assert_eq!(descendants.len(), 4);
}
