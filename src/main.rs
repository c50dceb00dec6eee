//! `txd` is the tx daemon. `txd serve` (default) runs the HTTP API with the
//! watchdog; `txd stdio` runs the JSON-RPC bridge on stdin/stdout for AI
//! agent hosts.

use tx_core::app::AppContext;
use tx_core::config::Settings;
use tx_core::{bridge, daemon};

#[tokio::main]
async fn main() {
    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    if matches!(mode.as_str(), "-h" | "--help" | "help") {
        eprintln!("usage: txd [serve|stdio]");
        return;
    }

    daemon::init_tracing();
    let settings = Settings::from_env();
    let ctx = match AppContext::init(settings).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("txd: failed to start: {e}");
            std::process::exit(1);
        }
    };

    let result = match mode.as_str() {
        "serve" => daemon::serve(ctx).await,
        "stdio" => bridge::run(ctx).await,
        other => {
            eprintln!("txd: unknown mode `{other}` (expected serve or stdio)");
            std::process::exit(2);
        }
    };
    if let Err(e) = result {
        eprintln!("txd: {e}");
        std::process::exit(1);
    }
}
