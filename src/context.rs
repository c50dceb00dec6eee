//! Context assembler: turn a task into a search query and hand back the
//! ranked learnings an agent should read before starting work.

use std::time::Instant;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::errors::TxResult;
use crate::learning::{SearchOptions, SearchPipeline};
use crate::model::learning::ScoredLearning;
use crate::model::task::validate_task_id;
use crate::repo::tasks::TaskRepo;

/// Learnings returned per context request.
const CONTEXT_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskContext {
    pub task_id: String,
    pub task_title: String,
    pub learnings: Vec<ScoredLearning>,
    pub search_query: String,
    pub search_duration_ms: u64,
}

#[derive(Clone)]
pub struct ContextAssembler {
    tasks: TaskRepo,
    pipeline: SearchPipeline,
}

impl ContextAssembler {
    pub fn new(pool: SqlitePool, pipeline: SearchPipeline) -> Self {
        Self {
            tasks: TaskRepo::new(pool),
            pipeline,
        }
    }

    pub async fn get_context(&self, task_id: &str) -> TxResult<TaskContext> {
        validate_task_id(task_id)?;
        let task = self.tasks.require(task_id).await?;
        let query = format!("{}\n{}", task.title, task.description);

        let started = Instant::now();
        let learnings = self
            .pipeline
            .search(
                &query,
                &SearchOptions {
                    limit: CONTEXT_LIMIT,
                    ..Default::default()
                },
            )
            .await?;
        let search_duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            task_id,
            results = learnings.len(),
            search_duration_ms,
            "assembled task context"
        );

        Ok(TaskContext {
            task_id: task.id,
            task_title: task.title,
            learnings,
            search_query: query,
            search_duration_ms,
        })
    }
}
