use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::cancel::CancellationSignal;
use crate::cleaner::{CleanupReport, OutputArtifactCleaner};
use crate::config::{CleanupPolicy, RunConfig};
use crate::events::{EventPublisher, RunEvent, RunEventPayload, RunId};
use crate::invoker::RuntimeInvoker;
use crate::job::{Job, JobDescriptor, JobId, JobKind, JobStatus};
use crate::queue::JobQueue;
use crate::runtime::group::ProcessGroup;
use crate::runtime::worker::WorkerHandle;
use crate::telemetry;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// What happened to one dispatched or attempted job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub sequence: usize,
    pub entry_point: String,
    pub output_prefix: PathBuf,
    pub status: JobStatus,
    pub elapsed_ms: u64,
}

/// Terminal result of [`Scheduler::run`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    /// One entry per job taken from the queue, in queue order.
    pub records: Vec<JobRecord>,
    /// Jobs still queued when the run was cancelled.
    pub undispatched: Vec<JobId>,
    pub cleanup: CleanupReport,
    /// Highest number of workers alive at once.
    pub peak_live: usize,
}

impl RunReport {
    pub fn is_cancelled(&self) -> bool {
        self.outcome == RunOutcome::Cancelled
    }

    pub fn count(&self, predicate: impl Fn(&JobStatus) -> bool) -> usize {
        self.records.iter().filter(|r| predicate(&r.status)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(JobStatus::is_success)
    }

    pub fn killed(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Killed))
    }

    pub fn spawn_failed(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::SpawnFailed { .. }))
    }

    /// Jobs that got a worker process.
    pub fn dispatched(&self) -> usize {
        self.records.len() - self.spawn_failed()
    }

    pub fn record(&self, sequence: usize) -> Option<&JobRecord> {
        self.records.iter().find(|r| r.sequence == sequence)
    }
}

/// Bookkeeping for one run, owned by the scheduler loop.
struct RunState<J: Job> {
    run_id: RunId,
    cleaner: OutputArtifactCleaner,
    /// Append-only list of every job that got a worker.
    dispatched: Vec<Arc<JobDescriptor<J>>>,
    records: Vec<JobRecord>,
    cleanup: CleanupReport,
    peak_live: usize,
}

impl<J: Job> RunState<J> {
    fn record(&mut self, job: &JobDescriptor<J>, status: JobStatus, elapsed: Duration) {
        self.records.push(JobRecord {
            job_id: job.id(),
            sequence: job.sequence(),
            entry_point: job.entry_point().as_str().to_string(),
            output_prefix: job.output_prefix().to_path_buf(),
            status,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }
}

/// Runs a queue of jobs as OS processes, at most `concurrency_limit` at a
/// time, until the queue drains or the cancellation signal is set.
pub struct Scheduler<J: Job> {
    invoker: Arc<dyn RuntimeInvoker<J>>,
    cleaner: OutputArtifactCleaner,
    events: Option<Arc<dyn EventPublisher>>,
}

impl<J: Job> fmt::Debug for Scheduler<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("job_type", &std::any::type_name::<J>())
            .field("cleaner", &self.cleaner)
            .field("events", &self.events.is_some())
            .finish()
    }
}

impl<J: Job> Scheduler<J> {
    pub fn new(
        invoker: Arc<dyn RuntimeInvoker<J>>,
        cleaner: OutputArtifactCleaner,
        events: Option<Arc<dyn EventPublisher>>,
    ) -> Self {
        Self {
            invoker,
            cleaner,
            events,
        }
    }

    pub fn cleaner(&self) -> &OutputArtifactCleaner {
        &self.cleaner
    }

    /// Run every job in `queue`.
    ///
    /// Never fails: spawn failures, non-zero exits and kills are recorded per
    /// job in the report. When `cancel` is observed set, every live worker is
    /// killed, queued jobs are never started, partial outputs are removed per
    /// [`CleanupPolicy`], and the signal is cleared before returning.
    pub async fn run(
        &self,
        queue: JobQueue<J>,
        config: &RunConfig,
        cancel: &CancellationSignal,
    ) -> RunReport {
        let run_id = RunId::new();
        let span = telemetry::run_span(
            run_id,
            queue.total(),
            config.effective_concurrency(),
        );
        self.run_inner(run_id, queue, config, cancel)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: RunId,
        mut queue: JobQueue<J>,
        config: &RunConfig,
        cancel: &CancellationSignal,
    ) -> RunReport {
        let limit = config.effective_concurrency();
        let cleaner = if config.debug_mode {
            self.cleaner.clone().dry_run()
        } else {
            self.cleaner.clone()
        };
        let mut state = RunState {
            run_id,
            cleaner,
            dispatched: Vec::new(),
            records: Vec::new(),
            cleanup: CleanupReport::default(),
            peak_live: 0,
        };
        let mut group = ProcessGroup::new();

        tracing::info!(
            "Starting run of {} jobs with concurrency {limit}",
            queue.total()
        );
        self.publish(
            run_id,
            RunEventPayload::RunStarted {
                total_jobs: queue.total(),
                concurrency: limit,
            },
        );

        loop {
            if cancel.is_set() {
                let undispatched = queue.drain_ids();
                self.cancel_run(&mut state, &mut group, undispatched.len(), config)
                    .await;
                cancel.clear();
                return self.finish(state, RunOutcome::Cancelled, undispatched);
            }

            let mut live = group.live_count();
            self.collect_reaped(&mut state, &mut group);

            let to_start = limit.saturating_sub(live).min(queue.remaining());
            for _ in 0..to_start {
                // A signal set mid top-up stops dispatch before the next spawn.
                if cancel.is_set() {
                    break;
                }
                let Some(job) = queue.take_up_to(1).pop() else {
                    break;
                };
                if self.dispatch(&mut state, &mut group, job, live + 1) {
                    live += 1;
                }
            }
            state.peak_live = state.peak_live.max(live);
            telemetry::set_live_workers(live);

            if let Some(timeout) = config.job_timeout() {
                group.kill_overdue(timeout);
            }

            if config.debug_mode {
                tracing::debug!(
                    live,
                    remaining = queue.remaining(),
                    finished = state.records.len(),
                    "poll"
                );
            }

            if queue.is_empty() && live == 0 && !cancel.is_set() {
                return self.finish(state, RunOutcome::Completed, Vec::new());
            }

            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval()) => {}
                _ = cancel.wait() => {}
            }
        }
    }

    /// Spawn one job. Returns whether a worker was started.
    fn dispatch(
        &self,
        state: &mut RunState<J>,
        group: &mut ProcessGroup<J>,
        job: JobDescriptor<J>,
        live_after: usize,
    ) -> bool {
        let job = Arc::new(job);
        let entry_point = job.entry_point().as_str();
        let _span =
            telemetry::job_span(job.id(), job.sequence(), entry_point).entered();

        let result = WorkerHandle::spawn(Arc::clone(&job), self.invoker.as_ref())
            .and_then(|handle| group.add(handle));
        match result {
            Ok(()) => {
                state.dispatched.push(Arc::clone(&job));
                telemetry::record_dispatched(entry_point, live_after);
                self.publish(
                    state.run_id,
                    RunEventPayload::Dispatched {
                        job_id: job.id(),
                        sequence: job.sequence(),
                        entry_point: entry_point.to_string(),
                        live: live_after,
                    },
                );
                true
            }
            Err(err) => {
                tracing::warn!("Could not start job {}: {err}", job.sequence());
                let status = JobStatus::SpawnFailed {
                    error: err.to_string(),
                };
                telemetry::record_finished(entry_point, &status, Duration::ZERO);
                state.record(&job, status, Duration::ZERO);
                self.publish(
                    state.run_id,
                    RunEventPayload::SpawnFailed {
                        job_id: job.id(),
                        sequence: job.sequence(),
                        error: err.to_string(),
                    },
                );
                false
            }
        }
    }

    /// Record every handle whose exit the group has observed.
    fn collect_reaped(&self, state: &mut RunState<J>, group: &mut ProcessGroup<J>) {
        for handle in group.take_reaped() {
            self.record_handle(state, &handle);
        }
    }

    fn record_handle(&self, state: &mut RunState<J>, handle: &WorkerHandle<J>) {
        let job = Arc::clone(handle.job());
        let entry_point = job.entry_point().as_str();
        let _span =
            telemetry::job_span(job.id(), job.sequence(), entry_point).entered();

        let status = handle
            .terminal_status()
            .unwrap_or(JobStatus::Killed);
        let elapsed = handle.run_time();
        telemetry::record_finished(entry_point, &status, elapsed);

        if status == JobStatus::TimedOut {
            let report = state.cleaner.clean_for(job.as_ref(), job.known_suffixes());
            self.publish_cleanup(state.run_id, Some(job.id()), &report);
            state.cleanup.merge(report);
        }

        self.publish(
            state.run_id,
            RunEventPayload::Finished {
                job_id: job.id(),
                sequence: job.sequence(),
                status: status.clone(),
            },
        );
        state.record(&job, status, elapsed);
    }

    async fn cancel_run(
        &self,
        state: &mut RunState<J>,
        group: &mut ProcessGroup<J>,
        undispatched: usize,
        config: &RunConfig,
    ) {
        let live = group.live_count();
        // Jobs that exited before the signal was observed keep their own status.
        self.collect_reaped(state, group);

        tracing::info!(
            "Cancellation requested: killing {live} workers, {undispatched} jobs never started"
        );
        self.publish(
            state.run_id,
            RunEventPayload::CancellationObserved { live, undispatched },
        );

        group.kill_all();
        let stuck = group
            .settle(config.kill_grace(), config.poll_interval())
            .await;
        self.collect_reaped(state, group);
        if stuck > 0 {
            tracing::error!(
                "{stuck} workers did not confirm exit within {} ms",
                config.kill_grace_ms
            );
            for handle in group.take_live() {
                self.record_handle(state, &handle);
            }
        }
        telemetry::set_live_workers(0);

        let targets: Vec<Arc<JobDescriptor<J>>> = match config.cleanup_policy {
            CleanupPolicy::AllDispatched => state.dispatched.clone(),
            CleanupPolicy::InterruptedOnly => {
                let interrupted: HashSet<JobId> = state
                    .records
                    .iter()
                    .filter(|r| r.status.was_interrupted())
                    .map(|r| r.job_id)
                    .collect();
                state
                    .dispatched
                    .iter()
                    .filter(|job| interrupted.contains(&job.id()))
                    .cloned()
                    .collect()
            }
        };

        let mut report = CleanupReport::default();
        for job in &targets {
            report.merge(state.cleaner.clean_for(job.as_ref(), job.known_suffixes()));
        }
        if state.cleaner.is_dry_run() && !report.retained.is_empty() {
            tracing::info!(
                "Debug mode: keeping {} partial output files",
                report.retained.len()
            );
        }
        self.publish_cleanup(state.run_id, None, &report);
        state.cleanup.merge(report);
    }

    fn finish(
        &self,
        mut state: RunState<J>,
        outcome: RunOutcome,
        undispatched: Vec<JobId>,
    ) -> RunReport {
        state.records.sort_by_key(|r| r.sequence);
        let report = RunReport {
            run_id: state.run_id,
            outcome,
            records: state.records,
            undispatched,
            cleanup: state.cleanup,
            peak_live: state.peak_live,
        };

        tracing::info!(
            "Run finished ({outcome:?}): {} succeeded, {} failed to start, {} killed, {} never started",
            report.succeeded(),
            report.spawn_failed(),
            report.killed(),
            report.undispatched.len()
        );
        self.publish(
            report.run_id,
            RunEventPayload::RunFinished {
                outcome,
                dispatched: state.dispatched.len(),
            },
        );
        report
    }

    fn publish_cleanup(
        &self,
        run_id: RunId,
        job_id: Option<JobId>,
        report: &CleanupReport,
    ) {
        self.publish(
            run_id,
            RunEventPayload::ArtifactsRemoved {
                job_id,
                removed: report.removed.len(),
                warnings: report.warnings.len(),
            },
        );
    }

    fn publish(&self, run_id: RunId, payload: RunEventPayload) {
        if let Some(events) = &self.events {
            if let Err(err) = events.publish(RunEvent::new(run_id, payload)) {
                tracing::warn!("failed to publish run event: {err}");
            }
        }
    }
}
