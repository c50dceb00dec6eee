//! Shared fixtures for the integration suite: a fresh temp-dir database
//! and a fully wired application context with noop collaborators.

use std::sync::Arc;

use tempfile::TempDir;
use tx_core::app::AppContext;
use tx_core::config::Settings;
use tx_core::model::task::{NewTask, Task, TaskStatus};

pub async fn test_ctx() -> (Arc<AppContext>, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = Settings::default();
    settings.storage.state_dir = dir.path().to_path_buf();
    settings.anchors.project_root = dir.path().to_path_buf();
    let pool = tx_core::storage::connect(&settings.storage.db_path())
        .await
        .expect("open database");
    (AppContext::with_pool(settings, pool), dir)
}

#[allow(dead_code)]
pub async fn make_task(ctx: &AppContext, title: &str, score: i64) -> Task {
    ctx.engine
        .create(NewTask {
            title: title.to_string(),
            score: Some(score),
            ..Default::default()
        })
        .await
        .expect("create task")
}

#[allow(dead_code)]
pub async fn set_status(ctx: &AppContext, id: &str, status: TaskStatus) -> Task {
    ctx.engine
        .update(
            id,
            tx_core::model::task::TaskPatch {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
        .expect("status update")
}
