//! Runtime integration tests for fanout.
//!
//! Runs real `sh` workers through the scheduler: bounded concurrency,
//! cancellation mid-dispatch, spawn failures, cleanup policies, timeouts.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use fanout::events::{EventSubscriber, InProcEventBus, RunEvent, RunEventPayload};
use fanout::{
    CancellationSignal, CleanupPolicy, EventPublisher, JobQueue, JobStatus,
    RunOutcome, RuntimeInvoker, Scheduler, SchedulerBuilder,
};
use fanout_testkit::{
    FailingInvoker, RecordingInvoker, ShellInvoker, TestJob,
    count_remaining_artifacts, init_tracing, max_overlap_in_journal,
    remaining_artifacts, sleeping_batch, test_config,
};
use tokio::sync::broadcast;
use tokio::time::timeout;

fn scheduler(invoker: Arc<dyn RuntimeInvoker<TestJob>>) -> Scheduler<TestJob> {
    SchedulerBuilder::new()
        .with_invoker(invoker)
        .build()
        .expect("build scheduler")
}

fn queue(jobs: &[TestJob]) -> JobQueue<TestJob> {
    jobs.iter().cloned().collect()
}

fn drain(rx: &mut broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn empty_queue_completes_without_spawning() {
    init_tracing();
    let invoker = RecordingInvoker::shell();
    let signal = CancellationSignal::new();

    let report = scheduler(Arc::new(invoker.clone()))
        .run(queue(&[]), &test_config(4), &signal)
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.records.is_empty());
    invoker.assert_call_count_eq(0);
}

#[tokio::test]
async fn ten_jobs_three_slots_complete() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("journal");
    let jobs: Vec<_> = sleeping_batch(dir.path(), 10, 100)
        .into_iter()
        .map(|job| job.with_journal(&journal))
        .collect();
    let invoker = RecordingInvoker::shell();
    let bus = Arc::new(InProcEventBus::new(256));
    let mut rx = bus.subscribe();
    let scheduler = SchedulerBuilder::<TestJob>::new()
        .with_invoker(Arc::new(invoker.clone()))
        .with_events(bus.clone() as Arc<dyn EventPublisher>)
        .build()
        .unwrap();

    let report = timeout(
        Duration::from_secs(30),
        scheduler.run(queue(&jobs), &test_config(3), &CancellationSignal::new()),
    )
    .await
    .expect("run did not finish within 30 seconds");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.records.len(), 10);
    assert_eq!(report.succeeded(), 10);
    assert_eq!(report.killed(), 0);
    assert!(report.peak_live <= 3, "peak live {}", report.peak_live);
    invoker.assert_call_count_eq(10);

    let sequences: Vec<_> =
        invoker.calls().iter().map(|call| call.sequence).collect();
    assert_eq!(sequences, (0..10).collect::<Vec<_>>());

    for event in drain(&mut rx) {
        if let RunEventPayload::Dispatched { live, .. } = event.payload {
            assert!(live <= 3, "dispatched with {live} live workers");
        }
    }

    // Overlap as seen by the workers themselves.
    let observed = max_overlap_in_journal(&journal).unwrap();
    assert!(observed <= 3, "{observed} workers overlapped");
    assert!(observed > 1, "workers never overlapped");

    // A completed run keeps every output.
    assert_eq!(count_remaining_artifacts(&jobs), 30);
}

#[tokio::test]
async fn cancel_after_fourth_dispatch() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let jobs = sleeping_batch(dir.path(), 10, 300);
    let signal = CancellationSignal::new();
    let invoker = RecordingInvoker::shell().cancel_after(4, signal.clone());

    let report = timeout(
        Duration::from_secs(30),
        scheduler(Arc::new(invoker.clone())).run(
            queue(&jobs),
            &test_config(2),
            &signal,
        ),
    )
    .await
    .expect("cancelled run did not return");

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.dispatched(), 4);
    assert_eq!(report.undispatched.len(), 6);
    assert!(report.killed() <= 2, "killed {}", report.killed());
    assert_eq!(count_remaining_artifacts(&jobs), 0);
    assert!(report.cleanup.warnings.is_empty());
    assert!(!signal.is_set(), "signal must be cleared after cancellation");
    invoker.assert_call_count_eq(4);
}

#[tokio::test]
async fn external_cancel_kills_live_workers_and_cleans_outputs() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let jobs = sleeping_batch(dir.path(), 6, 30_000);
    let signal = CancellationSignal::new();

    let canceller = {
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            signal.set();
        })
    };

    let report = timeout(
        Duration::from_secs(10),
        scheduler(Arc::new(ShellInvoker)).run(
            queue(&jobs),
            &test_config(3),
            &signal,
        ),
    )
    .await
    .expect("cancellation was not prompt");
    canceller.await.unwrap();

    assert!(report.is_cancelled());
    assert_eq!(report.killed(), 3);
    assert_eq!(report.undispatched.len(), 3);
    assert!(report.cleanup.removed.len() <= 9);
    assert_eq!(count_remaining_artifacts(&jobs), 0);
    assert!(!signal.is_set());
}

#[tokio::test]
async fn spawn_failure_is_recorded_and_run_continues() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let jobs = sleeping_batch(dir.path(), 10, 0);
    let invoker = FailingInvoker::new(Arc::new(ShellInvoker), [4]).unwrap();

    let report = scheduler(Arc::new(invoker))
        .run(queue(&jobs), &test_config(3), &CancellationSignal::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.records.len(), 10);
    assert_eq!(report.spawn_failed(), 1);
    assert_eq!(report.succeeded(), 9);
    match &report.record(4).unwrap().status {
        JobStatus::SpawnFailed { error } => {
            assert!(
                error.to_lowercase().contains("permission denied"),
                "{error}"
            );
        }
        other => panic!("job 4 should have failed to spawn, got {other}"),
    }
    assert!(remaining_artifacts(&jobs[4]).is_empty());
}

#[tokio::test]
async fn nonzero_exit_is_a_failure_not_a_run_error() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let jobs = vec![
        TestJob::new(dir.path(), "ok"),
        TestJob::new(dir.path(), "bad").with_exit_code(7),
    ];

    let report = scheduler(Arc::new(ShellInvoker))
        .run(queue(&jobs), &test_config(2), &CancellationSignal::new())
        .await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(
        report.record(1).unwrap().status,
        JobStatus::Failed { exit_code: Some(7) }
    );
}

async fn cancel_once_fast_jobs_finish(
    policy: CleanupPolicy,
    dir: &std::path::Path,
) -> (fanout::RunReport, Vec<TestJob>) {
    let jobs = vec![
        TestJob::new(dir, "fast-0"),
        TestJob::new(dir, "fast-1"),
        TestJob::new(dir, "slow-2").with_sleep(30_000),
        TestJob::new(dir, "slow-3").with_sleep(30_000),
    ];
    let signal = CancellationSignal::new();
    let canceller = {
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            signal.set();
        })
    };

    let report = scheduler(Arc::new(ShellInvoker))
        .run(
            queue(&jobs),
            &test_config(4).with_cleanup_policy(policy),
            &signal,
        )
        .await;
    canceller.await.unwrap();
    (report, jobs)
}

#[tokio::test]
async fn default_policy_discards_outputs_of_jobs_that_finished() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (report, jobs) =
        cancel_once_fast_jobs_finish(CleanupPolicy::AllDispatched, dir.path())
            .await;

    assert!(report.is_cancelled());
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.killed(), 2);
    assert_eq!(count_remaining_artifacts(&jobs), 0);
}

#[tokio::test]
async fn interrupted_only_policy_keeps_finished_outputs() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (report, jobs) = cancel_once_fast_jobs_finish(
        CleanupPolicy::InterruptedOnly,
        dir.path(),
    )
    .await;

    assert!(report.is_cancelled());
    assert_eq!(remaining_artifacts(&jobs[0]).len(), 3);
    assert_eq!(remaining_artifacts(&jobs[1]).len(), 3);
    assert!(remaining_artifacts(&jobs[2]).is_empty());
    assert!(remaining_artifacts(&jobs[3]).is_empty());
}

#[tokio::test]
async fn debug_mode_keeps_partial_outputs() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let jobs = sleeping_batch(dir.path(), 2, 30_000);
    let signal = CancellationSignal::new();
    let invoker = RecordingInvoker::shell().cancel_after(2, signal.clone());

    let report = scheduler(Arc::new(invoker))
        .run(queue(&jobs), &test_config(2).with_debug_mode(true), &signal)
        .await;

    assert!(report.is_cancelled());
    assert!(report.cleanup.removed.is_empty());
    let written = count_remaining_artifacts(&jobs);
    assert_eq!(report.cleanup.retained.len(), written);
}

#[tokio::test]
async fn signal_is_reusable_after_cancellation() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let signal = CancellationSignal::new();
    signal.set();

    let first = scheduler(Arc::new(ShellInvoker))
        .run(
            queue(&sleeping_batch(dir.path(), 3, 0)),
            &test_config(2),
            &signal,
        )
        .await;
    assert!(first.is_cancelled());
    assert_eq!(first.dispatched(), 0);
    assert!(!signal.is_set());

    let second = scheduler(Arc::new(ShellInvoker))
        .run(
            queue(&sleeping_batch(dir.path(), 3, 0)),
            &test_config(2),
            &signal,
        )
        .await;
    assert_eq!(second.outcome, RunOutcome::Completed);
    assert_eq!(second.succeeded(), 3);
}

#[tokio::test]
async fn timed_out_job_is_killed_and_its_outputs_removed() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let jobs = vec![
        TestJob::new(dir.path(), "hangs").with_sleep(30_000),
        TestJob::new(dir.path(), "quick"),
    ];

    let report = timeout(
        Duration::from_secs(15),
        scheduler(Arc::new(ShellInvoker)).run(
            queue(&jobs),
            &test_config(2).with_job_timeout(1),
            &CancellationSignal::new(),
        ),
    )
    .await
    .expect("timeout was not enforced");

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.record(0).unwrap().status, JobStatus::TimedOut);
    assert_eq!(report.record(1).unwrap().status, JobStatus::Succeeded);
    assert!(remaining_artifacts(&jobs[0]).is_empty());
    assert_eq!(remaining_artifacts(&jobs[1]).len(), 3);
}
