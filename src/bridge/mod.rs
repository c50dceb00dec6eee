//! Stdio JSON-RPC bridge: a newline-delimited JSON-RPC 2.0 loop exposing
//! a subset of the task and learning operations as tool calls for AI
//! agents. Just another thin caller of the same services.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::app::AppContext;
use crate::errors::{TxError, TxResult};
use crate::learning::SearchOptions;
use crate::model::task::{NewTask, TaskPatch, TaskStatus};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Run the bridge until stdin closes.
pub async fn run(ctx: Arc<AppContext>) -> TxResult<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => {
                let id = request.id.clone().unwrap_or(Value::Null);
                debug!(method = %request.method, "bridge call");
                match dispatch(&ctx, &request.method, request.params).await {
                    Ok((summary, data)) => json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "summary": summary, "data": data },
                    }),
                    Err(e) => rpc_error(id, &e),
                }
            }
            Err(e) => {
                warn!(error = %e, "unparsable bridge request");
                json!({
                    "jsonrpc": "2.0",
                    "id": Value::Null,
                    "error": { "code": -32700, "message": "parse error" },
                })
            }
        };
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

fn rpc_error(id: Value, err: &TxError) -> Value {
    let message = if err.is_public() {
        err.to_string()
    } else {
        "Internal server error".to_string()
    };
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": -32000,
            "message": message,
            "data": { "error": { "code": err.code(), "message": message } },
        },
    })
}

fn param_str(params: &Value, key: &str) -> TxResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| TxError::Validation(format!("missing string param: {key}")))
}

async fn dispatch(ctx: &AppContext, method: &str, params: Value) -> TxResult<(String, Value)> {
    match method {
        "task_create" => {
            let new: NewTask = serde_json::from_value(params)?;
            let task = ctx.engine.create(new).await?;
            Ok((
                format!("Created task {} \"{}\"", task.id, task.title),
                serde_json::to_value(task)?,
            ))
        }
        "task_get" => {
            let id = param_str(&params, "id")?;
            let task = ctx.engine.get_with_deps(&id).await?;
            Ok((
                format!("Task {} is {}", task.task.id, task.task.status),
                serde_json::to_value(task)?,
            ))
        }
        "task_list" => {
            let status = params
                .get("status")
                .and_then(|v| v.as_str())
                .map(|s| s.parse::<TaskStatus>().map_err(TxError::Validation))
                .transpose()?;
            let limit = params.get("limit").and_then(|v| v.as_i64()).unwrap_or(50);
            let page = ctx.engine.list(status, None, None, None, limit).await?;
            Ok((
                format!("{} of {} tasks", page.items.len(), page.total),
                serde_json::to_value(page)?,
            ))
        }
        "task_update" => {
            let id = param_str(&params, "id")?;
            let patch: TaskPatch = serde_json::from_value(params)?;
            let task = ctx.engine.update(&id, patch).await?;
            Ok((
                format!("Updated task {} ({})", task.id, task.status),
                serde_json::to_value(task)?,
            ))
        }
        "task_ready" => {
            let limit = params.get("limit").and_then(|v| v.as_i64()).unwrap_or(10);
            let ready = ctx.scheduler.get_ready(limit, true).await?;
            Ok((
                format!("{} ready tasks", ready.len()),
                serde_json::to_value(ready)?,
            ))
        }
        "task_done" => {
            let id = param_str(&params, "id")?;
            let outcome = ctx.engine.complete(&id).await?;
            Ok((
                format!(
                    "Completed {}; {} task(s) now ready",
                    outcome.task.id,
                    outcome.now_ready.len()
                ),
                serde_json::to_value(outcome)?,
            ))
        }
        "task_block" => {
            let id = param_str(&params, "id")?;
            let blocker = param_str(&params, "blockerId")?;
            let view = ctx.engine.add_blocker(&id, &blocker).await?;
            Ok((
                format!("{} is now blocked by {}", id, blocker),
                serde_json::to_value(view)?,
            ))
        }
        "learning_create" => {
            let new = serde_json::from_value(params)?;
            let learning = ctx.store.create(new).await?;
            Ok((
                format!("Recorded learning #{}", learning.id),
                serde_json::to_value(learning)?,
            ))
        }
        "learning_search" => {
            let query = param_str(&params, "query").unwrap_or_default();
            let limit = params.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
            let results = ctx
                .pipeline
                .search(
                    &query,
                    &SearchOptions {
                        limit,
                        ..Default::default()
                    },
                )
                .await?;
            Ok((
                format!("{} learnings for \"{}\"", results.len(), query),
                serde_json::to_value(results)?,
            ))
        }
        "context_get" => {
            let task_id = param_str(&params, "taskId")?;
            let context = ctx.assembler.get_context(&task_id).await?;
            Ok((
                format!(
                    "{} learnings for task {} in {}ms",
                    context.learnings.len(),
                    context.task_id,
                    context.search_duration_ms
                ),
                serde_json::to_value(context)?,
            ))
        }
        other => Err(TxError::Validation(format!("unknown method: {other}"))),
    }
}
