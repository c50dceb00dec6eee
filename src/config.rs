//! Runtime settings for the daemon and the core services.
//!
//! Every section has compiled-in defaults and can be overridden from the
//! recognized `TX_*` environment variables. Nothing here is re-read after
//! startup; collaborators receive their section by value.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// Listen address for the HTTP API.
    pub addr: String,
    /// Optional bearer/API key required on every request.
    pub api_key: Option<String>,
    /// Trust `X-Forwarded-For` when identifying peers (behind a proxy).
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7890".to_string(),
            api_key: None,
            trust_proxy: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// State directory holding the database, pid file, and start stamp.
    pub state_dir: PathBuf,
    /// Database file name inside the state directory.
    pub db_file: String,
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join(&self.db_file)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join("txd.pid")
    }

    pub fn started_at_path(&self) -> PathBuf {
        self.state_dir.join("txd.started_at")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".tx"),
            db_file: "tx.db".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per window, per peer.
    pub max_requests: u32,
    pub window_secs: u64,
    /// Message returned with 429 responses.
    pub message: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: 120,
            window_secs: 60,
            message: "Rate limit exceeded, slow down".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of alive workers the registry accepts.
    pub pool_size: usize,
    /// Expected heartbeat cadence.
    pub heartbeat_interval_secs: u64,
    /// Heartbeats missed before a worker counts as dead.
    pub missed_threshold: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            heartbeat_interval_secs: 10,
            missed_threshold: 3,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReaperConfig {
    /// Transcript-idle staleness threshold.
    pub transcript_idle_secs: u64,
    /// Heartbeat-lag staleness threshold.
    pub heartbeat_lag_secs: u64,
    /// How long to wait after SIGTERM before SIGKILL.
    pub term_grace_secs: u64,
    /// Cadence of the background sweep.
    pub sweep_interval_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            transcript_idle_secs: 120,
            heartbeat_lag_secs: 60,
            term_grace_secs: 10,
            sweep_interval_secs: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AnchorConfig {
    /// Root directory anchors are resolved under.
    pub project_root: PathBuf,
    /// Verification results older than this are considered stale.
    pub ttl_secs: u64,
    /// Invalid anchors older than this many days are pruned.
    pub prune_after_days: u32,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            ttl_secs: 3600,
            prune_after_days: 90,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint; None disables
    /// dense retrieval.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    /// Fixed dimension every stored vector must have.
    pub dim: usize,
    /// Client timeout for provider calls.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            model: "text-embedding-3-small".to_string(),
            dim: 256,
            timeout_secs: 30,
        }
    }
}

/// Top-level settings, one section per subsystem.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
    pub workers: WorkerConfig,
    pub reaper: ReaperConfig,
    pub anchors: AnchorConfig,
    pub embedding: EmbeddingConfig,
}

impl Settings {
    /// Build settings from the process environment, falling back to the
    /// compiled-in defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut s = Settings::default();
        if let Some(addr) = env_var("TX_ADDR") {
            s.server.addr = addr;
        }
        s.server.api_key = env_var("TX_API_KEY");
        if let Some(v) = env_bool("TX_TRUST_PROXY") {
            s.server.trust_proxy = v;
        }
        if let Some(path) = env_var("TX_DB_PATH") {
            let path = PathBuf::from(path);
            if let (Some(dir), Some(file)) = (path.parent(), path.file_name()) {
                s.storage.state_dir = dir.to_path_buf();
                s.storage.db_file = file.to_string_lossy().into_owned();
            }
        }
        if let Some(v) = env_bool("TX_RATE_LIMIT_ENABLED") {
            s.rate_limit.enabled = v;
        }
        if let Some(v) = env_parse("TX_RATE_LIMIT_MAX") {
            s.rate_limit.max_requests = v;
        }
        if let Some(v) = env_parse("TX_RATE_LIMIT_WINDOW_SECS") {
            s.rate_limit.window_secs = v;
        }
        if let Some(v) = env_var("TX_RATE_LIMIT_MESSAGE") {
            s.rate_limit.message = v;
        }
        if let Some(v) = env_parse("TX_ANCHOR_TTL_SECS") {
            s.anchors.ttl_secs = v;
        }
        if let Some(root) = env_var("TX_PROJECT_ROOT") {
            s.anchors.project_root = PathBuf::from(root);
        }
        s.embedding.url = env_var("TX_EMBEDDING_URL");
        s.embedding.api_key = env_var("TX_EMBEDDING_API_KEY");
        if let Some(model) = env_var("TX_EMBEDDING_MODEL") {
            s.embedding.model = model;
        }
        if let Some(dim) = env_parse("TX_EMBEDDING_DIM") {
            s.embedding.dim = dim;
        }
        s
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_var(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse().ok())
}
