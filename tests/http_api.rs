//! Integration tests for the HTTP boundary: status codes, the error
//! envelope, id validation at ingress, auth, and rate-limit headers.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use common::test_ctx;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn task_crud_over_http() {
    let (ctx, _dir) = test_ctx().await;
    let app = tx_core::api::router(ctx);

    // Create.
    let response = app
        .clone()
        .oneshot(post("/api/tasks", json!({"title": "ship it", "score": 700})))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().expect("id").to_string();
    assert_eq!(created["status"], "backlog");
    assert_eq!(created["score"], 700);

    // Read with deps view.
    let response = app
        .clone()
        .oneshot(get(&format!("/api/tasks/{id}")))
        .await
        .expect("get");
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["isReady"], true);
    assert_eq!(fetched["blockers"], json!([]));

    // List envelope.
    let response = app
        .clone()
        .oneshot(get("/api/tasks?limit=10"))
        .await
        .expect("list");
    let page = body_json(response).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["hasMore"], false);
    assert!(page["items"].as_array().expect("items").len() == 1);

    // Complete.
    let response = app
        .clone()
        .oneshot(post(&format!("/api/tasks/{id}/done"), json!({})))
        .await
        .expect("done");
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["task"]["status"], "done");
    assert_eq!(outcome["nowReady"], json!([]));
}

#[tokio::test]
async fn validation_and_not_found_envelopes() {
    let (ctx, _dir) = test_ctx().await;
    let app = tx_core::api::router(ctx);

    // Malformed id at ingress.
    let response = app
        .clone()
        .oneshot(get("/api/tasks/not-a-task-id"))
        .await
        .expect("bad id");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "validation");
    assert!(body["error"]["message"].is_string());

    // Well-formed but absent.
    let response = app
        .clone()
        .oneshot(get("/api/tasks/tx-zzzz99"))
        .await
        .expect("missing");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "not_found");

    // Empty title.
    let response = app
        .clone()
        .oneshot(post("/api/tasks", json!({"title": "  "})))
        .await
        .expect("empty title");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Illegal transition.
    let response = app
        .clone()
        .oneshot(post("/api/tasks", json!({"title": "t"})))
        .await
        .expect("create");
    let id = body_json(response).await["id"].as_str().unwrap().to_string();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/tasks/{id}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"status": "review"}).to_string()))
                .expect("request"),
        )
        .await
        .expect("patch");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "illegal_transition");
}

#[tokio::test]
async fn claim_conflict_maps_to_409() {
    let (ctx, _dir) = test_ctx().await;
    let app = tx_core::api::router(ctx);

    let response = app
        .clone()
        .oneshot(post("/api/tasks", json!({"title": "contested"})))
        .await
        .expect("task");
    let task_id = body_json(response).await["id"].as_str().unwrap().to_string();

    let mut worker_ids = Vec::new();
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post("/api/workers/register", json!({})))
            .await
            .expect("register");
        assert_eq!(response.status(), StatusCode::CREATED);
        worker_ids.push(body_json(response).await["id"].as_str().unwrap().to_string());
    }

    let response = app
        .clone()
        .oneshot(post(
            "/api/claims",
            json!({"taskId": task_id, "workerId": worker_ids[0]}),
        ))
        .await
        .expect("first claim");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(post(
            "/api/claims",
            json!({"taskId": task_id, "workerId": worker_ids[1]}),
        ))
        .await
        .expect("second claim");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "already_claimed");

    let response = app
        .clone()
        .oneshot(post("/api/claims/release", json!({"taskId": task_id})))
        .await
        .expect("release");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["released"], worker_ids[0].as_str());
}

#[tokio::test]
async fn learning_routes_and_context() {
    let (ctx, _dir) = test_ctx().await;
    let app = tx_core::api::router(ctx);

    let response = app
        .clone()
        .oneshot(post(
            "/api/learnings",
            json!({"content": "use prepared statements", "category": "db"}),
        ))
        .await
        .expect("create learning");
    assert_eq!(response.status(), StatusCode::CREATED);
    let learning_id = body_json(response).await["id"].as_i64().expect("id");

    let response = app
        .clone()
        .oneshot(get("/api/learnings?query=prepared%20statements"))
        .await
        .expect("search");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let items = body["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert!(items[0]["relevanceScore"].as_f64().expect("score") > 0.0);
    assert!(items[0].get("bm25Rank").is_some());

    // Semantic-only search without a provider is a 503.
    let response = app
        .clone()
        .oneshot(get("/api/learnings?query=prepared&semantic=true"))
        .await
        .expect("semantic");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Outcome feedback.
    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/learnings/{learning_id}/helpful"),
            json!({"score": 1.0}),
        ))
        .await
        .expect("helpful");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["outcomeScore"], 1.0);

    let response = app
        .clone()
        .oneshot(post(
            &format!("/api/learnings/{learning_id}/helpful"),
            json!({"score": 1.5}),
        ))
        .await
        .expect("out of range");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Context for a task.
    let response = app
        .clone()
        .oneshot(post("/api/tasks", json!({"title": "prepared statements everywhere"})))
        .await
        .expect("task");
    let task_id = body_json(response).await["id"].as_str().unwrap().to_string();
    let response = app
        .clone()
        .oneshot(get(&format!("/api/context/{task_id}")))
        .await
        .expect("context");
    assert_eq!(response.status(), StatusCode::OK);
    let context = body_json(response).await;
    assert_eq!(context["taskId"], task_id.as_str());
    assert!(context["searchDurationMs"].is_number());
    assert_eq!(context["learnings"].as_array().expect("learnings").len(), 1);
}

#[tokio::test]
async fn api_key_gates_requests() {
    let (ctx, _dir) = test_ctx().await;
    let mut settings = ctx.settings.clone();
    settings.server.api_key = Some("sekret".to_string());
    let guarded = tx_core::app::AppContext::with_pool(settings, ctx.pool.clone());
    let app = tx_core::api::router(guarded);

    let response = app.clone().oneshot(get("/api/tasks")).await.expect("no key");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "unauthorized");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/tasks")
                .header("authorization", "Bearer sekret")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("bearer");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/tasks")
                .header("x-api-key", "sekret")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("x-api-key");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_limit_headers_and_429() {
    let (ctx, _dir) = test_ctx().await;
    let mut settings = ctx.settings.clone();
    settings.rate_limit.enabled = true;
    settings.rate_limit.max_requests = 2;
    settings.rate_limit.window_secs = 60;
    let limited = tx_core::app::AppContext::with_pool(settings, ctx.pool.clone());
    let app = tx_core::api::router(limited);

    for expected_remaining in ["1", "0"] {
        let response = app.clone().oneshot(get("/api/tasks")).await.expect("ok");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("X-RateLimit-Limit")
                .and_then(|v| v.to_str().ok()),
            Some("2")
        );
        assert_eq!(
            response
                .headers()
                .get("X-RateLimit-Remaining")
                .and_then(|v| v.to_str().ok()),
            Some(expected_remaining)
        );
    }

    let response = app.clone().oneshot(get("/api/tasks")).await.expect("429");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("Retry-After"));
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "rate_limited");
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (ctx, _dir) = test_ctx().await;
    let app = tx_core::api::router(ctx);
    let response = app.oneshot(get("/api/health")).await.expect("health");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}
