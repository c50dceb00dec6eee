//! Task routes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::app::AppContext;
use crate::errors::TxError;
use crate::model::cursor::Page;
use crate::model::task::{
    CompletionOutcome, NewTask, Task, TaskPatch, TaskStatus, TaskTreeNode, TaskWithDeps,
};

use super::error::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub search: Option<String>,
    pub parent: Option<String>,
}

pub async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<Task>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<TaskStatus>().map_err(TxError::Validation))
        .transpose()?;
    let page = ctx
        .engine
        .list(
            status,
            query.parent,
            query.search,
            query.cursor,
            query.limit.unwrap_or(50),
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyQuery {
    pub limit: Option<i64>,
    pub exclude_claimed: Option<bool>,
}

pub async fn ready_tasks(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ReadyQuery>,
) -> ApiResult<Json<Vec<TaskWithDeps>>> {
    let ready = ctx
        .scheduler
        .get_ready(query.limit.unwrap_or(10), query.exclude_claimed.unwrap_or(true))
        .await?;
    Ok(Json(ready))
}

pub async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskWithDeps>> {
    Ok(Json(ctx.engine.get_with_deps(&id).await?))
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Json(new): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = ctx.engine.create(new).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn patch_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<Task>> {
    Ok(Json(ctx.engine.update(&id, patch).await?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    pub cascade: Option<bool>,
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = ctx
        .engine
        .remove(&id, query.cascade.unwrap_or(false))
        .await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

pub async fn complete_task(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CompletionOutcome>> {
    Ok(Json(ctx.engine.complete(&id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBody {
    pub blocker_id: String,
}

pub async fn add_blocker(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<BlockBody>,
) -> ApiResult<Json<TaskWithDeps>> {
    Ok(Json(ctx.engine.add_blocker(&id, &body.blocker_id).await?))
}

pub async fn remove_blocker(
    State(ctx): State<Arc<AppContext>>,
    Path((id, blocker_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let removed = ctx.engine.remove_blocker(&id, &blocker_id).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

pub async fn get_tree(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<TaskTreeNode>> {
    Ok(Json(ctx.engine.get_tree(&id).await?))
}
