//! Tracing spans and recording helpers for runs and jobs.
//!
//! Every `record_*` function logs through `tracing` and, with the `metrics`
//! feature enabled, updates the matching collector in [`crate::metrics`].
//! They are cheap no-ops on the metrics side when the feature is off.
//!
//! # Example
//!
//! ```ignore
//! use fanout::telemetry::{job_span, record_dispatched};
//!
//! let span = job_span(job_id, 3, "ne-estimation");
//! let _enter = span.enter();
//! record_dispatched("ne-estimation", live);
//! ```

use std::time::Duration;
use tracing::{Span, info_span};

use crate::error::CleanupWarning;
use crate::events::RunId;
use crate::job::{JobId, JobStatus};

/// Span covering one `Scheduler::run` call.
#[must_use]
pub fn run_span(run_id: RunId, total_jobs: usize, concurrency: usize) -> Span {
    info_span!(
        "fanout.run",
        run_id = %run_id,
        total_jobs = total_jobs,
        concurrency = concurrency,
    )
}

/// Span covering the dispatch and reaping of one job.
#[must_use]
pub fn job_span(
    job_id: JobId,
    sequence: usize,
    entry_point: impl AsRef<str>,
) -> Span {
    info_span!(
        "fanout.job",
        job_id = %job_id,
        sequence = sequence,
        entry_point = %entry_point.as_ref(),
    )
}

/// Record a worker start.
pub fn record_dispatched(entry_point: impl AsRef<str>, live: usize) {
    tracing::debug!(
        entry_point = %entry_point.as_ref(),
        live = live,
        "worker dispatched"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_dispatched(entry_point.as_ref());
}

/// Record a job reaching a terminal status.
pub fn record_finished(
    entry_point: impl AsRef<str>,
    status: &JobStatus,
    elapsed: Duration,
) {
    match status {
        JobStatus::Succeeded | JobStatus::Killed => tracing::debug!(
            entry_point = %entry_point.as_ref(),
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "job finished"
        ),
        _ => tracing::warn!(
            entry_point = %entry_point.as_ref(),
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "job did not succeed"
        ),
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_finished(
        entry_point.as_ref(),
        status.as_str(),
        elapsed.as_secs_f64(),
    );
}

/// Update the live worker gauge.
pub fn set_live_workers(live: usize) {
    #[cfg(feature = "metrics")]
    crate::metrics::set_live_workers(live);

    #[cfg(not(feature = "metrics"))]
    let _ = live;
}

/// Record files removed by one cleaner pass.
pub fn record_artifacts_removed(count: usize) {
    if count > 0 {
        tracing::info!(count = count, "removed partial output files");
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_artifacts_removed(count);
}

pub fn record_cleanup_warning(warning: &CleanupWarning) {
    tracing::warn!(
        path = %warning.path.display(),
        "could not remove output file: {}",
        warning.message
    );
}
