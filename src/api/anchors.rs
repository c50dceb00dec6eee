//! Anchor routes: attach, verify, restore, pin, history.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::app::AppContext;
use crate::errors::TxError;
use crate::model::anchor::{Anchor, DetectedBy, NewAnchor};

use super::error::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub learning_id: Option<i64>,
    pub path: Option<String>,
}

pub async fn list_anchors(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let items = match (query.learning_id, query.path) {
        (Some(learning_id), _) => ctx.anchors.list_for_learning(learning_id).await?,
        (None, Some(path)) => ctx.anchors.list_for_path(&path).await?,
        (None, None) => {
            return Err(TxError::Validation(
                "pass learningId or path".to_string(),
            )
            .into());
        }
    };
    Ok(Json(serde_json::json!({ "items": items })))
}

pub async fn create_anchor(
    State(ctx): State<Arc<AppContext>>,
    Json(new): Json<NewAnchor>,
) -> ApiResult<(StatusCode, Json<Anchor>)> {
    let anchor = ctx.anchors.create(new).await?;
    Ok((StatusCode::CREATED, Json(anchor)))
}

pub async fn get_anchor(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Anchor>> {
    Ok(Json(ctx.anchors.get(id).await?))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBody {
    pub detected_by: Option<DetectedBy>,
    /// Skip the check when the last verification is within the TTL.
    #[serde(default)]
    pub lazy: bool,
}

pub async fn verify_anchor(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    body: Option<Json<VerifyBody>>,
) -> ApiResult<Json<Anchor>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let detected_by = body.detected_by.unwrap_or(DetectedBy::Agent);
    let anchor = if body.lazy {
        ctx.anchors.verify_fresh(id, DetectedBy::Lazy).await?
    } else {
        ctx.anchors.verify(id, detected_by).await?
    };
    Ok(Json(anchor))
}

pub async fn restore_anchor(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Anchor>> {
    Ok(Json(ctx.anchors.restore(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PinBody {
    pub pinned: bool,
}

pub async fn pin_anchor(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<PinBody>,
) -> ApiResult<Json<Anchor>> {
    Ok(Json(ctx.anchors.set_pinned(id, body.pinned).await?))
}

pub async fn anchor_history(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let items = ctx.anchors.history(id, 50).await?;
    Ok(Json(serde_json::json!({ "items": items })))
}
