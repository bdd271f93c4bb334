use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do with output files of dispatched jobs when a run is cancelled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Remove outputs of every job dispatched in the run, including jobs that
    /// exited on their own before cancellation was observed.
    #[default]
    AllDispatched,
    /// Remove outputs only of jobs the orchestrator killed, keeping outputs of
    /// jobs that had already exited.
    InterruptedOnly,
}

/// Per-run orchestration settings.
///
/// Passed explicitly into every [`Scheduler::run`](crate::runtime::Scheduler::run)
/// call; nothing here is process-wide state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum number of workers alive at once. Zero is treated as one.
    pub concurrency_limit: usize,
    /// Interval between liveness polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// How long to wait for killed workers to confirm exit, in milliseconds.
    pub kill_grace_ms: u64,
    /// Optional wall-clock limit per job, in seconds.
    pub job_timeout_secs: Option<u64>,
    /// Output retention policy on cancellation.
    pub cleanup_policy: CleanupPolicy,
    /// Keep artifacts on cancellation (cleanup only reports what it would
    /// remove) and log every poll.
    pub debug_mode: bool,
}

impl RunConfig {
    /// Create a configuration with the given concurrency limit.
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            concurrency_limit,
            ..Self::default()
        }
    }

    /// Set the concurrency limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set the polling interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set the grace period for killed workers.
    pub fn with_kill_grace(mut self, ms: u64) -> Self {
        self.kill_grace_ms = ms;
        self
    }

    /// Set a per-job timeout.
    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = Some(secs);
        self
    }

    /// Set the cleanup policy.
    pub fn with_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    /// Enable or disable debug mode.
    pub fn with_debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Concurrency limit actually enforced.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency_limit.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            concurrency_limit: cpus,
            poll_interval_ms: 50,
            kill_grace_ms: 5_000,
            job_timeout_secs: None,
            cleanup_policy: CleanupPolicy::default(),
            debug_mode: false,
        }
    }
}
