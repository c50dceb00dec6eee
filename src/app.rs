//! Application context: one place that opens the store, chooses the
//! optional collaborators, and wires every service with plain constructor
//! injection. The HTTP and stdio boundaries are thin callers of this.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::anchor::AnchorService;
use crate::config::Settings;
use crate::context::ContextAssembler;
use crate::errors::TxResult;
use crate::feedback::FeedbackTracker;
use crate::graph::{GraphEngine, ReadyScheduler};
use crate::learning::pipeline::{NoopExpander, NoopReranker};
use crate::learning::{
    EmbeddingProvider, HttpEmbedder, LearningStore, NoopEmbedder, SearchPipeline,
};
use crate::storage;
use crate::workers::{ClaimManager, RunReaper, RunService, WorkerRegistry};

pub struct AppContext {
    pub settings: Settings,
    pub pool: SqlitePool,
    pub engine: GraphEngine,
    pub scheduler: ReadyScheduler,
    pub registry: WorkerRegistry,
    pub claims: ClaimManager,
    pub runs: RunService,
    pub reaper: RunReaper,
    pub store: LearningStore,
    pub pipeline: SearchPipeline,
    pub anchors: AnchorService,
    pub feedback: FeedbackTracker,
    pub assembler: ContextAssembler,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    /// Open the database and build the full service graph. Collaborators
    /// default to their noops; dense retrieval switches on when the
    /// embedding endpoint is configured.
    pub async fn init(settings: Settings) -> TxResult<Arc<Self>> {
        let pool = storage::connect(&settings.storage.db_path()).await?;
        Ok(Self::with_pool(settings, pool))
    }

    /// Wire services over an already-open pool (tests use this with a
    /// temporary database).
    pub fn with_pool(settings: Settings, pool: SqlitePool) -> Arc<Self> {
        let embedder: Arc<dyn EmbeddingProvider> =
            match HttpEmbedder::from_config(&settings.embedding) {
                Some(provider) => {
                    info!(model = %settings.embedding.model, "embedding provider configured");
                    Arc::new(provider)
                }
                None => Arc::new(NoopEmbedder),
            };
        let pipeline = SearchPipeline::new(
            pool.clone(),
            embedder.clone(),
            Arc::new(NoopExpander),
            Arc::new(NoopReranker),
        );
        Arc::new(Self {
            engine: GraphEngine::new(pool.clone()),
            scheduler: ReadyScheduler::new(pool.clone()),
            registry: WorkerRegistry::new(pool.clone(), settings.workers.clone()),
            claims: ClaimManager::new(pool.clone()),
            runs: RunService::new(pool.clone()),
            reaper: RunReaper::new(pool.clone(), settings.reaper.clone()),
            store: LearningStore::new(pool.clone(), embedder.clone()),
            assembler: ContextAssembler::new(pool.clone(), pipeline.clone()),
            anchors: AnchorService::new(pool.clone(), settings.anchors.clone()),
            feedback: FeedbackTracker::new(pool.clone()),
            pipeline,
            pool,
            settings,
            started_at: Utc::now(),
        })
    }
}
