//! Run reaper: detect stalled runs by transcript-idle or heartbeat-lag and
//! put their resources back into circulation.
//!
//! Signal delivery and pid probes are best-effort. A vanished process, a
//! permission error, or any other OS refusal must never abort the batch;
//! permission-denied probes count the process as alive.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ReaperConfig;
use crate::errors::TxResult;
use crate::model::run::{ReapOutcome, RunStatus, StalledRun};
use crate::model::task::TaskStatus;
use crate::repo::{claims::ClaimRepo, runs::RunRepo, tasks::TaskRepo};
use crate::storage::{ms_to_datetime, now_ms};

/// Per-call overrides for one reap pass.
#[derive(Debug, Clone, Default)]
pub struct ReapOptions {
    pub transcript_idle_secs: Option<u64>,
    pub heartbeat_lag_secs: Option<u64>,
    pub reset_task: bool,
    pub dry_run: bool,
}

#[derive(Clone)]
pub struct RunReaper {
    runs: RunRepo,
    tasks: TaskRepo,
    claims: ClaimRepo,
    config: ReaperConfig,
}

impl RunReaper {
    pub fn new(pool: SqlitePool, config: ReaperConfig) -> Self {
        Self {
            runs: RunRepo::new(pool.clone()),
            tasks: TaskRepo::new(pool.clone()),
            claims: ClaimRepo::new(pool),
            config,
        }
    }

    /// Running runs that tripped either staleness signal, annotated with
    /// the triggering reason and the observed lag.
    pub async fn list_stalled(
        &self,
        transcript_idle_secs: Option<u64>,
        heartbeat_lag_secs: Option<u64>,
    ) -> TxResult<Vec<StalledRun>> {
        let idle = transcript_idle_secs.unwrap_or(self.config.transcript_idle_secs);
        let lag = heartbeat_lag_secs.unwrap_or(self.config.heartbeat_lag_secs);
        self.runs
            .list_stalled(now_ms(), (idle * 1000) as i64, (lag * 1000) as i64)
            .await
    }

    /// Terminate every stalled run: signal its process, mark it `reaped`,
    /// release the claim on its task, and optionally reset the task to
    /// `ready`. Per-run failures are logged and skipped, never fatal.
    pub async fn reap_stalled(&self, options: ReapOptions) -> TxResult<Vec<ReapOutcome>> {
        let stalled = self
            .list_stalled(options.transcript_idle_secs, options.heartbeat_lag_secs)
            .await?;
        let mut outcomes = Vec::with_capacity(stalled.len());
        for stalled_run in stalled {
            match self.reap_one(&stalled_run, &options).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(run_id = %stalled_run.run.id, error = %e, "failed to reap run");
                }
            }
        }
        Ok(outcomes)
    }

    async fn reap_one(&self, stalled: &StalledRun, options: &ReapOptions) -> TxResult<ReapOutcome> {
        let run = &stalled.run;
        let process_terminated = if options.dry_run {
            false
        } else {
            match run.pid {
                Some(pid) if pid > 0 => {
                    terminate_process(pid, Duration::from_secs(self.config.term_grace_secs)).await
                }
                _ => false,
            }
        };

        let mut task_reset = false;
        if !options.dry_run {
            let mut updated = run.clone();
            updated.status = RunStatus::Reaped;
            updated.error_message = Some(format!(
                "reaped: {} for {}s",
                stalled.reason, stalled.lag_secs
            ));
            updated.updated_at = ms_to_datetime(now_ms());
            self.runs.update(&updated).await?;

            if let Some(task_id) = &run.task_id {
                self.claims.release_task(task_id).await?;
                if options.reset_task {
                    task_reset = self.reset_task(task_id).await?;
                }
            }
        }

        info!(
            run_id = %run.id,
            reason = %stalled.reason,
            lag_secs = stalled.lag_secs,
            process_terminated,
            task_reset,
            dry_run = options.dry_run,
            "reaped stalled run"
        );
        Ok(ReapOutcome {
            id: run.id.clone(),
            reason: stalled.reason,
            process_terminated,
            task_reset,
        })
    }

    /// Return an abandoned `active` task to `ready`. This is a watchdog
    /// write, not an agent transition, so it goes straight to the row.
    async fn reset_task(&self, task_id: &str) -> TxResult<bool> {
        let Some(mut task) = self.tasks.get(task_id).await? else {
            return Ok(false);
        };
        if task.status != TaskStatus::Active {
            return Ok(false);
        }
        task.status = TaskStatus::Ready;
        task.updated_at = ms_to_datetime(now_ms());
        self.tasks.update(&task).await?;
        Ok(true)
    }

    /// Background watchdog: every tick sweeps dead workers and stalled
    /// runs; anchor verification and pruning ride along on a slower
    /// cadence.
    pub async fn run_loop(
        self,
        registry: crate::workers::WorkerRegistry,
        anchors: crate::anchor::AnchorService,
    ) {
        // Anchor sweeps per watchdog tick (30 s default => every 5 min).
        const ANCHOR_EVERY: u64 = 10;
        // Prune roughly once a day at the default cadence.
        const PRUNE_EVERY: u64 = 2880;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;
            tick = tick.wrapping_add(1);
            if let Err(e) = registry.sweep_dead().await {
                warn!(error = %e, "dead-worker sweep failed");
            }
            let options = ReapOptions {
                reset_task: true,
                ..Default::default()
            };
            if let Err(e) = self.reap_stalled(options).await {
                warn!(error = %e, "stalled-run sweep failed");
            }
            if tick % ANCHOR_EVERY == 0 {
                if let Err(e) = anchors.verify_batch(50).await {
                    warn!(error = %e, "periodic anchor verification failed");
                }
            }
            if tick % PRUNE_EVERY == 0 {
                if let Err(e) = anchors.prune().await {
                    warn!(error = %e, "anchor pruning failed");
                }
            }
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL. Returns whether a live
/// process was signalled. Errors from the OS are swallowed here on
/// purpose; the caller records the boolean outcome.
async fn terminate_process(pid: i64, grace: Duration) -> bool {
    if !process_alive(pid) {
        return false;
    }
    signal(pid, libc::SIGTERM);
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    signal(pid, libc::SIGKILL);
    true
}

fn signal(pid: i64, sig: libc::c_int) {
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        warn!(pid, sig, error = %err, "signal delivery failed");
    }
}

/// Probe with signal 0. EPERM means the process exists but belongs to
/// someone else; treat it as alive.
fn process_alive(pid: i64) -> bool {
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonexistent_pid_is_dead() {
        // Pid values beyond the kernel's pid_max cannot exist.
        assert!(!process_alive(i32::MAX as i64 - 1));
    }

    #[tokio::test]
    async fn test_terminate_missing_process_is_false() {
        assert!(!terminate_process(i32::MAX as i64 - 1, Duration::from_millis(10)).await);
    }
}
