//! The task graph: hierarchy plus blocker DAG, and the scheduler that
//! derives the ready frontier from it.

use crate::errors::TxResult;
use crate::model::task::{Task, TaskWithDeps};
use crate::repo::{deps::DepRepo, tasks::TaskRepo};

pub mod engine;
pub mod scheduler;

pub use engine::GraphEngine;
pub use scheduler::ReadyScheduler;

/// Maximum depth of the parent chain.
pub const MAX_PARENT_DEPTH: usize = 10;

/// Attach the computed dependency view to a task.
pub(crate) async fn with_deps(
    tasks: &TaskRepo,
    deps: &DepRepo,
    task: Task,
) -> TxResult<TaskWithDeps> {
    let blocker_statuses = tasks.blocker_statuses(&task.id).await?;
    let blocks = deps.blocked_by(&task.id).await?;
    let children = tasks.children_ids(&task.id).await?;
    let is_ready = task.status.is_workable()
        && blocker_statuses
            .iter()
            .all(|(_, status)| *status == crate::model::task::TaskStatus::Done);
    Ok(TaskWithDeps {
        task,
        blockers: blocker_statuses.into_iter().map(|(id, _)| id).collect(),
        blocks,
        children,
        is_ready,
    })
}
