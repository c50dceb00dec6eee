//! End-to-end walkthrough of the agent work loop against an in-process
//! store: seed a small dependency graph, register a worker, claim the top
//! ready task, pull context, deposit a learning, and complete the task to
//! unblock the next one.
//!
//! Run with:
//! ```bash
//! cargo run --example agent_loop
//! ```

use tx_core::app::AppContext;
use tx_core::config::Settings;
use tx_core::learning::SearchOptions;
use tx_core::model::learning::NewLearning;
use tx_core::model::task::NewTask;
use tx_core::model::worker::RegisterWorker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut settings = Settings::default();
    settings.storage.state_dir = dir.path().to_path_buf();
    let ctx = AppContext::init(settings).await?;

    // Seed: schema design blocks the API work, which blocks the docs.
    let schema = ctx
        .engine
        .create(NewTask {
            title: "Design claims schema".to_string(),
            description: "Partial unique index for active claims".to_string(),
            score: Some(800),
            ..Default::default()
        })
        .await?;
    let api = ctx
        .engine
        .create(NewTask {
            title: "Expose claim endpoints".to_string(),
            score: Some(700),
            ..Default::default()
        })
        .await?;
    let docs = ctx
        .engine
        .create(NewTask {
            title: "Document the lease contract".to_string(),
            score: Some(600),
            ..Default::default()
        })
        .await?;
    ctx.engine.add_blocker(&api.id, &schema.id).await?;
    ctx.engine.add_blocker(&docs.id, &api.id).await?;

    // Prior knowledge other agents left behind.
    ctx.store
        .create(NewLearning {
            content: "SQLite partial unique indexes arbitrate claim races without locks"
                .to_string(),
            category: Some("db".to_string()),
            ..Default::default()
        })
        .await?;

    // The loop an agent runs.
    let worker = ctx.registry.register(RegisterWorker::default()).await?;
    println!("registered {}", worker.id);

    let ready = ctx.scheduler.get_ready(5, true).await?;
    println!("ready frontier: {:?}", ready.iter().map(|t| &t.task.title).collect::<Vec<_>>());
    let pick = &ready[0].task;

    let claim = ctx.claims.acquire(&pick.id, &worker.id).await?;
    println!("claimed {} at {}", claim.task_id, claim.claimed_at);

    let context = ctx.assembler.get_context(&pick.id).await?;
    println!(
        "context: {} learning(s) in {}ms",
        context.learnings.len(),
        context.search_duration_ms
    );
    for scored in &context.learnings {
        println!("  [{:.3}] {}", scored.relevance_score, scored.learning.content);
    }

    // ... the agent does the actual work here ...

    ctx.store
        .create(NewLearning {
            content: "Name the active-claim index so migrations can drop it cleanly".to_string(),
            category: Some("db".to_string()),
            ..Default::default()
        })
        .await?;

    let outcome = ctx.engine.complete(&pick.id).await?;
    ctx.claims.release(&pick.id).await?;
    println!(
        "completed {}; now ready: {:?}",
        outcome.task.id,
        outcome.now_ready.iter().map(|t| &t.title).collect::<Vec<_>>()
    );

    let learnings = ctx
        .pipeline
        .search("claim index", &SearchOptions::default())
        .await?;
    println!("store now answers with {} learning(s)", learnings.len());
    Ok(())
}
