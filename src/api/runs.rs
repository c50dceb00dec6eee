//! Run routes, including the stalled listing and the reap trigger.

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
use crate::model::run::{NewRun, Run, RunPatch, RunStatus};
use crate::workers::ReapOptions;

use super::error::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
    pub agent: Option<String>,
    pub status: Option<String>,
    pub task_id: Option<String>,
}

pub async fn list_runs(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Page<Run>>> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<RunStatus>().map_err(TxError::Validation))
        .transpose()?;
    let page = ctx
        .runs
        .list(
            query.agent,
            status,
            query.task_id,
            query.cursor,
            query.limit.unwrap_or(50),
        )
        .await?;
    Ok(Json(page))
}

pub async fn get_run(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Run>> {
    Ok(Json(ctx.runs.get(&id).await?))
}

pub async fn create_run(
    State(ctx): State<Arc<AppContext>>,
    Json(new): Json<NewRun>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let run = ctx.runs.create(new).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn patch_run(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(patch): Json<RunPatch>,
) -> ApiResult<Json<Run>> {
    Ok(Json(ctx.runs.update(&id, patch).await?))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    #[serde(default)]
    pub stdout_bytes: i64,
    #[serde(default)]
    pub stderr_bytes: i64,
    #[serde(default)]
    pub transcript_bytes: i64,
}

pub async fn heartbeat_run(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> ApiResult<Json<Run>> {
    let run = ctx
        .runs
        .heartbeat(&id, body.stdout_bytes, body.stderr_bytes, body.transcript_bytes)
        .await?;
    Ok(Json(run))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StalledQuery {
    pub transcript_idle_seconds: Option<u64>,
    pub heartbeat_lag_seconds: Option<u64>,
}

pub async fn list_stalled(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<StalledQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let items = ctx
        .reaper
        .list_stalled(query.transcript_idle_seconds, query.heartbeat_lag_seconds)
        .await?;
    Ok(Json(serde_json::json!({ "items": items })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReapBody {
    pub transcript_idle_seconds: Option<u64>,
    pub heartbeat_lag_seconds: Option<u64>,
    #[serde(default)]
    pub reset_task: bool,
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn reap_stalled(
    State(ctx): State<Arc<AppContext>>,
    body: Option<Json<ReapBody>>,
) -> ApiResult<Json<serde_json::Value>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let outcomes = ctx
        .reaper
        .reap_stalled(ReapOptions {
            transcript_idle_secs: body.transcript_idle_seconds,
            heartbeat_lag_secs: body.heartbeat_lag_seconds,
            reset_task: body.reset_task,
            dry_run: body.dry_run,
        })
        .await?;
    Ok(Json(serde_json::json!({ "runs": outcomes })))
}
