//! Worker pool: registration and heartbeats, exclusive task claims, run
//! tracking, and the watchdog that reaps stalled runs and dead workers.

pub mod claims;
pub mod reaper;
pub mod registry;
pub mod runs;

pub use claims::ClaimManager;
pub use reaper::{ReapOptions, RunReaper};
pub use registry::WorkerRegistry;
pub use runs::RunService;
