//! Learning, context, and file-learning routes.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use crate::app::AppContext;
use crate::context::TaskContext;
use crate::learning::SearchOptions;
use crate::model::anchor::{AnchorType, NewAnchor};
use crate::model::learning::{Learning, NewLearning, ScoredLearning, SourceType};

use super::error::ApiResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub query: Option<String>,
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
    pub category: Option<String>,
    /// Explicitly require dense retrieval; surfaces 503 when the provider
    /// is offline instead of degrading to BM25-only results.
    pub semantic: Option<bool>,
}

pub async fn search_learnings(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let options = SearchOptions {
        limit: query.limit.unwrap_or(10),
        min_score: query.min_score,
        category: query.category,
        semantic_required: query.semantic.unwrap_or(false),
    };
    let items: Vec<ScoredLearning> = ctx
        .pipeline
        .search(query.query.as_deref().unwrap_or(""), &options)
        .await?;
    Ok(Json(serde_json::json!({ "items": items })))
}

pub async fn get_learning(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Learning>> {
    Ok(Json(ctx.store.get(id).await?))
}

pub async fn create_learning(
    State(ctx): State<Arc<AppContext>>,
    Json(new): Json<NewLearning>,
) -> ApiResult<(StatusCode, Json<Learning>)> {
    let learning = ctx.store.create(new).await?;
    Ok((StatusCode::CREATED, Json(learning)))
}

pub async fn delete_learning(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = ctx.store.delete(id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
pub struct HelpfulBody {
    pub score: f64,
}

pub async fn mark_helpful(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<i64>,
    Json(body): Json<HelpfulBody>,
) -> ApiResult<Json<Learning>> {
    Ok(Json(ctx.store.set_outcome(id, body.score).await?))
}

pub async fn get_context(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskContext>> {
    Ok(Json(ctx.assembler.get_context(&task_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub path: String,
}

pub async fn list_file_learnings(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<FileQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let items = ctx.store.by_file_path(&query.path).await?;
    Ok(Json(serde_json::json!({ "items": items })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFileLearning {
    pub path: String,
    pub content: String,
    pub category: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// A file learning is a learning with `source_type = file` plus a glob
/// anchor keeping it attached to the path.
pub async fn create_file_learning(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<NewFileLearning>,
) -> ApiResult<(StatusCode, Json<Learning>)> {
    let learning = ctx
        .store
        .create(NewLearning {
            content: body.content,
            source_type: SourceType::File,
            source_ref: Some(body.path.clone()),
            keywords: body.keywords,
            category: body.category,
        })
        .await?;
    ctx.anchors
        .create(NewAnchor {
            learning_id: learning.id,
            anchor_type: AnchorType::Glob,
            file_path: body.path.clone(),
            anchor_value: body.path,
            content_hash: None,
            content_preview: None,
            symbol_name: None,
            line_start: None,
            line_end: None,
            pinned: false,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(learning)))
}
