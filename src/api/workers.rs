//! Worker registry and claim routes: the lease/heartbeat contract the
//! dispatch orchestrator consumes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::app::AppContext;
use crate::model::worker::{Claim, Heartbeat, RegisterWorker, Worker};

use super::error::ApiResult;

pub async fn list_workers(
    State(ctx): State<Arc<AppContext>>,
) -> ApiResult<Json<serde_json::Value>> {
    let items = ctx.registry.list().await?;
    Ok(Json(serde_json::json!({ "items": items })))
}

pub async fn register_worker(
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<RegisterWorker>,
) -> ApiResult<(StatusCode, Json<Worker>)> {
    let worker = ctx.registry.register(req).await?;
    Ok((StatusCode::CREATED, Json(worker)))
}

pub async fn worker_heartbeat(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(beat): Json<Heartbeat>,
) -> ApiResult<StatusCode> {
    ctx.registry.heartbeat(&id, beat).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deregister_worker(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    ctx.registry.deregister(&id).await?;
    Ok(Json(serde_json::json!({ "deregistered": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBody {
    pub task_id: String,
    pub worker_id: String,
}

pub async fn acquire_claim(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<ClaimBody>,
) -> ApiResult<(StatusCode, Json<Claim>)> {
    let claim = ctx.claims.acquire(&body.task_id, &body.worker_id).await?;
    Ok((StatusCode::CREATED, Json(claim)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseBody {
    pub task_id: String,
}

pub async fn release_claim(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<ReleaseBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let released = ctx.claims.release(&body.task_id).await?;
    Ok(Json(serde_json::json!({ "released": released })))
}
