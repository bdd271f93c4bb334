//! Prometheus metrics for fanout runs.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `fanout_jobs_dispatched_total` - Workers started, by entry point
//! - `fanout_jobs_finished_total` - Jobs reaching a terminal status
//! - `fanout_artifacts_removed_total` - Output files deleted by the cleaner
//!
//! ## Gauges
//! - `fanout_live_workers` - Workers alive at the last poll
//!
//! ## Histograms
//! - `fanout_job_duration_seconds` - Wall-clock time from spawn to exit
#![cfg(feature = "metrics")]

use prometheus::{
    CounterVec, Gauge, HistogramVec, IntCounter, Opts, Registry,
    exponential_buckets,
};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `entry_point`.
pub static JOBS_DISPATCHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "fanout_jobs_dispatched_total",
        "Total number of worker processes started",
    );
    CounterVec::new(opts, &["entry_point"])
        .expect("fanout_jobs_dispatched_total metric creation failed")
});

/// Labels: `entry_point`, `status`.
pub static JOBS_FINISHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "fanout_jobs_finished_total",
        "Total number of jobs reaching a terminal status",
    );
    CounterVec::new(opts, &["entry_point", "status"])
        .expect("fanout_jobs_finished_total metric creation failed")
});

pub static ARTIFACTS_REMOVED_TOTAL: LazyLock<IntCounter> =
    LazyLock::new(|| {
        IntCounter::new(
            "fanout_artifacts_removed_total",
            "Total number of partial output files removed",
        )
        .expect("fanout_artifacts_removed_total metric creation failed")
    });

pub static LIVE_WORKERS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new("fanout_live_workers", "Worker processes currently alive")
        .expect("fanout_live_workers metric creation failed")
});

/// Labels: `entry_point`, `status`.
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets =
        exponential_buckets(0.01, 2.0, 16).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "fanout_job_duration_seconds",
        "Worker wall-clock duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["entry_point", "status"])
        .expect("fanout_job_duration_seconds metric creation failed")
});

/// Register every collector with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_DISPATCHED_TOTAL.clone())
            as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(ARTIFACTS_REMOVED_TOTAL.clone()),
        Box::new(LIVE_WORKERS.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_dispatched(entry_point: &str) {
    JOBS_DISPATCHED_TOTAL.with_label_values(&[entry_point]).inc();
}

pub fn record_finished(entry_point: &str, status: &str, duration_secs: f64) {
    JOBS_FINISHED_TOTAL
        .with_label_values(&[entry_point, status])
        .inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[entry_point, status])
        .observe(duration_secs);
}

pub fn record_artifacts_removed(count: usize) {
    ARTIFACTS_REMOVED_TOTAL.inc_by(count as u64);
}

pub fn set_live_workers(live: usize) {
    LIVE_WORKERS.set(live as f64);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
