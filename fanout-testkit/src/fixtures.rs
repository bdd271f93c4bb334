use fanout::{Job, RunConfig};
use std::path::{Path, PathBuf};
use std::sync::Once;

use crate::{TEST_SUFFIXES, TestJob};

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every
/// test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A config suited to tests: fast polling, short grace period.
pub fn test_config(concurrency: usize) -> RunConfig {
    RunConfig::new(concurrency)
        .with_poll_interval(10)
        .with_kill_grace(2_000)
}

/// `n` jobs named `job-0..job-{n-1}` under `dir`, each sleeping `sleep_ms`.
pub fn sleeping_batch(dir: &Path, n: usize, sleep_ms: u64) -> Vec<TestJob> {
    (0..n)
        .map(|i| TestJob::new(dir, format!("job-{i}")).with_sleep(sleep_ms))
        .collect()
}

/// Files under `job`'s prefix ending in one of its known suffixes.
pub fn remaining_artifacts(job: &TestJob) -> Vec<PathBuf> {
    let prefix = job.output_prefix();
    let (Some(dir), Some(stem)) = (prefix.parent(), prefix.file_name()) else {
        return Vec::new();
    };
    let stem = stem.to_string_lossy().into_owned();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            name.starts_with(&stem)
                && TEST_SUFFIXES.iter().any(|suffix| {
                    name.ends_with(suffix)
                        || name.ends_with(&format!("{suffix}.bz2"))
                })
        })
        .collect();
    found.sort();
    found
}

/// Total of [`remaining_artifacts`] over `jobs`.
pub fn count_remaining_artifacts<'a>(
    jobs: impl IntoIterator<Item = &'a TestJob>,
) -> usize {
    jobs.into_iter().map(|job| remaining_artifacts(job).len()).sum()
}

/// Highest number of jobs whose `start` line had been journaled without a
/// matching `end`, reading lines in append order.
///
/// A worker journals `start` after it is spawned and `end` before it exits,
/// so this never exceeds the number of processes actually alive at once.
pub fn max_overlap_in_journal(journal: &Path) -> std::io::Result<usize> {
    let contents = std::fs::read_to_string(journal)?;
    let mut open = 0usize;
    let mut max = 0usize;
    for line in contents.lines() {
        if line.starts_with("start ") {
            open += 1;
            max = max.max(open);
        } else if line.starts_with("end ") {
            open = open.saturating_sub(1);
        }
    }
    Ok(max)
}
