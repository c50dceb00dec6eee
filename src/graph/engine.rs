//! Task graph engine: create/update/delete, blocker edges with cycle
//! rejection, and the bounded hierarchy walks.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::errors::{TxError, TxResult};
use crate::ids;
use crate::model::cursor::{Cursor, Page};
use crate::model::task::{
    CompletionOutcome, NewTask, Task, TaskPatch, TaskStatus, TaskTreeNode, TaskWithDeps,
    SCORE_DEFAULT, validate_task_id,
};
use crate::repo::tasks::{MAX_DESCENDANT_DEPTH, TaskListFilter, TaskRepo};
use crate::repo::deps::DepRepo;
use crate::storage::ms_to_datetime;

use super::with_deps;

/// Attempts at minting a fresh id before giving up on collisions.
const ID_RETRY_LIMIT: usize = 8;

#[derive(Clone)]
pub struct GraphEngine {
    tasks: TaskRepo,
    deps: DepRepo,
}

impl GraphEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            tasks: TaskRepo::new(pool.clone()),
            deps: DepRepo::new(pool),
        }
    }

    pub async fn create(&self, new: NewTask) -> TxResult<Task> {
        new.validate()?;
        if let Some(parent) = &new.parent_id {
            self.ensure_parent_depth(parent).await?;
        }
        let now = ms_to_datetime(crate::storage::now_ms());
        let mut task = Task {
            id: String::new(),
            title: new.title,
            description: new.description,
            status: new.status.unwrap_or(TaskStatus::Backlog),
            score: new.score.unwrap_or(SCORE_DEFAULT),
            parent_id: new.parent_id,
            metadata: new
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        if task.status == TaskStatus::Done {
            task.completed_at = Some(now);
        }
        for attempt in 0..ID_RETRY_LIMIT {
            task.id = ids::new_task_id();
            if self.tasks.try_insert(&task).await? {
                debug!(task_id = %task.id, attempt, "created task");
                return Ok(task);
            }
        }
        Err(TxError::Validation(
            "could not allocate a unique task id".to_string(),
        ))
    }

    pub async fn get(&self, id: &str) -> TxResult<Task> {
        validate_task_id(id)?;
        self.tasks.require(id).await
    }

    pub async fn get_with_deps(&self, id: &str) -> TxResult<TaskWithDeps> {
        let task = self.get(id).await?;
        with_deps(&self.tasks, &self.deps, task).await
    }

    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        parent_id: Option<String>,
        search: Option<String>,
        cursor: Option<String>,
        limit: i64,
    ) -> TxResult<Page<Task>> {
        let cursor = cursor.as_deref().map(Cursor::parse).transpose()?;
        let limit = limit.clamp(1, 500);
        let filter = TaskListFilter {
            status,
            parent_id,
            search,
            cursor,
            limit: limit + 1,
        };
        let (mut items, total) = self.tasks.list(&filter).await?;
        let has_more = items.len() as i64 > limit;
        items.truncate(limit as usize);
        let next_cursor = if has_more {
            items
                .last()
                .map(|t| Cursor::new(t.score, t.id.clone()).encode())
        } else {
            None
        };
        Ok(Page {
            items,
            next_cursor,
            has_more,
            total,
        })
    }

    pub async fn update(&self, id: &str, patch: TaskPatch) -> TxResult<Task> {
        patch.validate()?;
        let mut task = self.get(id).await?;
        let now = ms_to_datetime(crate::storage::now_ms());

        if let Some(next) = patch.status {
            if !task.status.can_transition(next) {
                return Err(TxError::IllegalTransition {
                    from: task.status.to_string(),
                    to: next.to_string(),
                });
            }
            if next == TaskStatus::Done && task.status != TaskStatus::Done {
                task.completed_at = Some(now);
            } else if next != TaskStatus::Done && task.status == TaskStatus::Done {
                task.completed_at = None;
            }
            task.status = next;
        }
        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(score) = patch.score {
            task.score = score;
        }
        if let Some(parent) = patch.parent_id {
            self.check_reparent(&task.id, parent.as_deref()).await?;
            task.parent_id = parent;
        }
        if let Some(metadata) = patch.metadata {
            task.metadata = metadata;
        }
        task.updated_at = now;
        self.tasks.update(&task).await?;
        Ok(task)
    }

    /// Apply one patch to many tasks atomically with optimistic locking.
    pub async fn update_many(
        &self,
        ids: &[String],
        status: Option<TaskStatus>,
        score: Option<i64>,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> TxResult<Vec<Task>> {
        for id in ids {
            validate_task_id(id)?;
        }
        if let Some(score) = score {
            crate::model::task::validate_score(score)?;
        }
        self.tasks
            .update_many(ids, status, score, expected_updated_at)
            .await
    }

    /// Delete a task. Without `cascade`, children block the delete; with it
    /// the whole subtree goes. Returns the number of deleted tasks.
    pub async fn remove(&self, id: &str, cascade: bool) -> TxResult<u64> {
        let task = self.get(id).await?;
        let has_children = self.tasks.has_children(&task.id).await?;
        if has_children && !cascade {
            return Err(TxError::HasChildren(task.id));
        }
        let mut ids = vec![task.id.clone()];
        if cascade {
            ids.extend(
                self.tasks
                    .descendants(&task.id, MAX_DESCENDANT_DEPTH)
                    .await?
                    .into_iter()
                    .map(|t| t.id),
            );
        }
        let deleted = self.tasks.delete_all(&ids).await?;
        info!(task_id = %task.id, deleted, cascade, "removed task");
        Ok(deleted)
    }

    /// Insert the blocker edge `blocker -> id` after the cycle probe.
    pub async fn add_blocker(&self, id: &str, blocker_id: &str) -> TxResult<TaskWithDeps> {
        validate_task_id(id)?;
        validate_task_id(blocker_id)?;
        if id == blocker_id {
            return Err(TxError::Validation(
                "a task cannot block itself".to_string(),
            ));
        }
        let task = self.tasks.require(id).await?;
        self.tasks.require(blocker_id).await?;
        // One recursive traversal from the blocker; if the blocked task is
        // already in its closure the new edge would close a cycle.
        if self.deps.closure_contains(blocker_id, id).await? {
            return Err(TxError::CircularDependency(format!(
                "{blocker_id} already depends on {id}"
            )));
        }
        self.deps.add(id, blocker_id).await?;
        with_deps(&self.tasks, &self.deps, task).await
    }

    pub async fn remove_blocker(&self, id: &str, blocker_id: &str) -> TxResult<bool> {
        validate_task_id(id)?;
        validate_task_id(blocker_id)?;
        self.deps.remove(id, blocker_id).await
    }

    pub async fn get_children(&self, id: &str) -> TxResult<Vec<Task>> {
        self.get(id).await?;
        self.tasks.children(id).await
    }

    pub async fn get_ancestors(&self, id: &str) -> TxResult<Vec<Task>> {
        self.get(id).await?;
        self.tasks.ancestors(id).await
    }

    pub async fn get_descendants(&self, id: &str) -> TxResult<Vec<Task>> {
        self.get(id).await?;
        self.tasks.descendants(id, MAX_DESCENDANT_DEPTH).await
    }

    /// Build the nested subtree rooted at `id`. A visited set terminates
    /// defensively on self-referencing rows.
    pub async fn get_tree(&self, id: &str) -> TxResult<TaskTreeNode> {
        let root = self.get(id).await?;
        let descendants = self.tasks.descendants(id, MAX_DESCENDANT_DEPTH).await?;

        let mut by_parent: HashMap<String, Vec<Task>> = HashMap::new();
        for task in descendants {
            if let Some(parent) = task.parent_id.clone() {
                by_parent.entry(parent).or_default().push(task);
            }
        }
        let mut visited = HashSet::new();
        visited.insert(root.id.clone());
        Ok(build_tree(root, &mut by_parent, &mut visited))
    }

    /// Mark a task done and report which tasks just became ready.
    pub async fn complete(&self, id: &str) -> TxResult<CompletionOutcome> {
        let task = self
            .update(
                id,
                TaskPatch {
                    status: Some(TaskStatus::Done),
                    ..Default::default()
                },
            )
            .await?;
        let mut now_ready = Vec::new();
        for blocked_id in self.deps.blocked_by(id).await? {
            let Some(candidate) = self.tasks.get(&blocked_id).await? else {
                continue;
            };
            if !candidate.status.is_workable() {
                continue;
            }
            let all_done = self
                .tasks
                .blocker_statuses(&blocked_id)
                .await?
                .iter()
                .all(|(_, status)| *status == TaskStatus::Done);
            if all_done {
                now_ready.push(candidate);
            }
        }
        now_ready.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
        info!(task_id = %task.id, unblocked = now_ready.len(), "completed task");
        Ok(CompletionOutcome { task, now_ready })
    }

    async fn ensure_parent_depth(&self, parent_id: &str) -> TxResult<()> {
        validate_task_id(parent_id)?;
        self.tasks.require(parent_id).await?;
        let depth = self.tasks.ancestors(parent_id).await?.len() + 1;
        if depth >= super::MAX_PARENT_DEPTH {
            return Err(TxError::Validation(format!(
                "parent chain would exceed the depth limit of {}",
                super::MAX_PARENT_DEPTH
            )));
        }
        Ok(())
    }

    async fn check_reparent(&self, id: &str, new_parent: Option<&str>) -> TxResult<()> {
        let Some(parent) = new_parent else {
            return Ok(());
        };
        if parent == id {
            return Err(TxError::CircularDependency(format!(
                "{id} cannot be its own parent"
            )));
        }
        self.ensure_parent_depth(parent).await?;
        let descendant_ids: HashSet<String> = self
            .tasks
            .descendants(id, MAX_DESCENDANT_DEPTH)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();
        if descendant_ids.contains(parent) {
            return Err(TxError::CircularDependency(format!(
                "{parent} is a descendant of {id}"
            )));
        }
        Ok(())
    }
}

fn build_tree(
    task: Task,
    by_parent: &mut HashMap<String, Vec<Task>>,
    visited: &mut HashSet<String>,
) -> TaskTreeNode {
    let children = by_parent.remove(&task.id).unwrap_or_default();
    let filtered_children: Vec<Task> = children
        .into_iter()
        .filter(|child| visited.insert(child.id.clone()))
        .collect();
    let child_nodes = filtered_children
        .into_iter()
        .map(|child| build_tree(child, by_parent, visited))
        .collect();
    TaskTreeNode {
        task,
        children: child_nodes,
    }
}
