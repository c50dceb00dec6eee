//! Daemon bootstrap: tracing, state-dir files, the HTTP listener, and the
//! background watchdog loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::AppContext;
use crate::errors::TxResult;

/// Install the global tracing subscriber. `RUST_LOG` wins; the default
/// keeps the crate at info.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Write the pid file and the start stamp into the state directory.
pub fn write_state_files(ctx: &AppContext) -> TxResult<()> {
    let storage = &ctx.settings.storage;
    std::fs::create_dir_all(&storage.state_dir)?;
    std::fs::write(storage.pid_path(), std::process::id().to_string())?;
    std::fs::write(
        storage.started_at_path(),
        ctx.started_at.timestamp_millis().to_string(),
    )?;
    Ok(())
}

fn remove_state_files(ctx: &AppContext) {
    let storage = &ctx.settings.storage;
    let _ = std::fs::remove_file(storage.pid_path());
    let _ = std::fs::remove_file(storage.started_at_path());
}

/// Serve the HTTP API until ctrl-c, with the watchdog sweeping stalled
/// runs and dead workers in the background.
pub async fn serve(ctx: Arc<AppContext>) -> TxResult<()> {
    write_state_files(&ctx)?;

    let reaper = ctx.reaper.clone();
    let registry = ctx.registry.clone();
    let anchors = ctx.anchors.clone();
    let watchdog = tokio::spawn(reaper.run_loop(registry, anchors));

    let addr = ctx.settings.server.addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, db = %ctx.settings.storage.db_path().display(), "txd listening");

    let app = crate::api::router(ctx.clone());
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    watchdog.abort();
    remove_state_files(&ctx);
    info!("txd stopped");
    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
