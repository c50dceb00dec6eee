//! HTTP boundary: route wiring, auth, rate limiting, and error mapping.
//! Every handler is a thin adapter over the services in [`AppContext`];
//! the core never learns it is being driven over HTTP.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde_json::json;

use crate::app::AppContext;

pub mod anchors;
pub mod error;
pub mod learnings;
pub mod ratelimit;
pub mod runs;
pub mod tasks;
pub mod workers;

use ratelimit::RateLimiter;

/// Build the full API router for one application context.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let mut app = Router::new()
        .route("/api/health", get(health))
        // Tasks
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/api/tasks/ready", get(tasks::ready_tasks))
        .route(
            "/api/tasks/{id}",
            get(tasks::get_task)
                .patch(tasks::patch_task)
                .delete(tasks::delete_task),
        )
        .route("/api/tasks/{id}/done", post(tasks::complete_task))
        .route("/api/tasks/{id}/block", post(tasks::add_blocker))
        .route(
            "/api/tasks/{id}/block/{blocker_id}",
            delete(tasks::remove_blocker),
        )
        .route("/api/tasks/{id}/tree", get(tasks::get_tree))
        // Learnings
        .route(
            "/api/learnings",
            get(learnings::search_learnings).post(learnings::create_learning),
        )
        .route(
            "/api/learnings/{id}",
            get(learnings::get_learning).delete(learnings::delete_learning),
        )
        .route("/api/learnings/{id}/helpful", post(learnings::mark_helpful))
        .route("/api/context/{task_id}", get(learnings::get_context))
        .route(
            "/api/file-learnings",
            get(learnings::list_file_learnings).post(learnings::create_file_learning),
        )
        // Runs
        .route("/api/runs", get(runs::list_runs).post(runs::create_run))
        .route("/api/runs/stalled", get(runs::list_stalled))
        .route("/api/runs/stalled/reap", post(runs::reap_stalled))
        .route("/api/runs/{id}", get(runs::get_run).patch(runs::patch_run))
        .route("/api/runs/{id}/heartbeat", post(runs::heartbeat_run))
        // Workers and claims
        .route("/api/workers", get(workers::list_workers))
        .route("/api/workers/register", post(workers::register_worker))
        .route(
            "/api/workers/{id}/heartbeat",
            post(workers::worker_heartbeat),
        )
        .route("/api/workers/{id}", delete(workers::deregister_worker))
        .route("/api/claims", post(workers::acquire_claim))
        .route("/api/claims/release", post(workers::release_claim))
        // Anchors
        .route(
            "/api/anchors",
            get(anchors::list_anchors).post(anchors::create_anchor),
        )
        .route("/api/anchors/{id}", get(anchors::get_anchor))
        .route("/api/anchors/{id}/verify", post(anchors::verify_anchor))
        .route("/api/anchors/{id}/restore", post(anchors::restore_anchor))
        .route("/api/anchors/{id}/pin", post(anchors::pin_anchor))
        .route("/api/anchors/{id}/history", get(anchors::anchor_history));

    if ctx.settings.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::new(
            ctx.settings.rate_limit.clone(),
            ctx.settings.server.trust_proxy,
        ));
        app = app.layer(middleware::from_fn_with_state(
            limiter,
            ratelimit::rate_limit_middleware,
        ));
    }
    if ctx.settings.server.api_key.is_some() {
        app = app.layer(middleware::from_fn_with_state(ctx.clone(), auth_middleware));
    }
    app.with_state(ctx)
}

/// Bearer / `X-Api-Key` check; active only when a key is configured.
async fn auth_middleware(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = ctx.settings.server.api_key.as_deref() else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            request
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
        });
    if provided == Some(expected) {
        return next.run(request).await;
    }
    let body = json!({
        "error": {
            "code": "unauthorized",
            "message": "missing or invalid API key",
        }
    });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

async fn health(State(ctx): State<Arc<AppContext>>) -> Response {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&ctx.pool).await.is_ok();
    let uptime_secs = (chrono::Utc::now() - ctx.started_at).num_seconds();
    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if db_ok { "ok" } else { "degraded" },
            "uptimeSecs": uptime_secs,
        })),
    )
        .into_response()
}
