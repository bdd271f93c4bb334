use std::collections::HashMap;
use std::time::Duration;

use crate::error::{FanoutError, Result};
use crate::job::{Job, JobId};
use crate::runtime::worker::WorkerHandle;

/// The live workers of one run, keyed by job.
///
/// Owned by the scheduler loop and never shared, so it needs no locking.
/// Handles whose exit has been observed move to a reaped buffer until the
/// scheduler collects them with [`take_reaped`](Self::take_reaped).
#[derive(Debug)]
pub struct ProcessGroup<J: Job> {
    live: HashMap<JobId, WorkerHandle<J>>,
    reaped: Vec<WorkerHandle<J>>,
}

impl<J: Job> Default for ProcessGroup<J> {
    fn default() -> Self {
        Self {
            live: HashMap::new(),
            reaped: Vec::new(),
        }
    }
}

impl<J: Job> ProcessGroup<J> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, handle: WorkerHandle<J>) -> Result<()> {
        let job_id = handle.job_id();
        if self.live.contains_key(&job_id)
            || self.reaped.iter().any(|h| h.job_id() == job_id)
        {
            return Err(FanoutError::DuplicateWorker(job_id));
        }
        self.live.insert(job_id, handle);
        Ok(())
    }

    /// Poll every handle and return how many are still running.
    pub fn live_count(&mut self) -> usize {
        let exited: Vec<JobId> = self
            .live
            .iter_mut()
            .filter_map(|(id, handle)| (!handle.is_alive()).then_some(*id))
            .collect();
        for id in exited {
            if let Some(handle) = self.live.remove(&id) {
                self.reaped.push(handle);
            }
        }
        self.live.len()
    }

    /// Handles whose exit was observed since the last call.
    pub fn take_reaped(&mut self) -> Vec<WorkerHandle<J>> {
        std::mem::take(&mut self.reaped)
    }

    /// Handles not yet observed to exit, removed from the group.
    pub fn take_live(&mut self) -> Vec<WorkerHandle<J>> {
        self.live.drain().map(|(_, handle)| handle).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Send a kill to every live worker without waiting for them to exit.
    pub fn kill_all(&mut self) {
        for handle in self.live.values_mut() {
            handle.kill();
        }
    }

    /// Kill workers that have been running longer than `timeout`.
    pub fn kill_overdue(&mut self, timeout: Duration) -> usize {
        let mut killed = 0;
        for handle in self.live.values_mut() {
            if !handle.timed_out() && handle.elapsed() >= timeout {
                tracing::warn!(
                    job_id = %handle.job_id(),
                    elapsed_ms = handle.elapsed().as_millis() as u64,
                    "worker exceeded its time limit, killing it"
                );
                handle.kill_for_timeout();
                if handle.timed_out() {
                    killed += 1;
                }
            }
        }
        killed
    }

    /// Wait up to `grace` for every live worker to exit, polling every
    /// `poll`. Returns how many never confirmed exit.
    pub async fn settle(&mut self, grace: Duration, poll: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let live = self.live_count();
            if live == 0 || tokio::time::Instant::now() >= deadline {
                return live;
            }
            tokio::time::sleep(poll.max(Duration::from_millis(1))).await;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::families::{AnalysisJob, NeEstimationRun};
    use crate::invoker::RuntimeInvoker;
    use crate::job::{JobDescriptor, JobStatus};
    use std::sync::Arc;
    use tokio::process::Command;

    struct Sh(&'static str);

    impl RuntimeInvoker<AnalysisJob> for Sh {
        fn command(
            &self,
            _job: &JobDescriptor<AnalysisJob>,
        ) -> anyhow::Result<Command> {
            let mut command = Command::new("sh");
            command.arg("-c").arg(self.0);
            Ok(command)
        }
    }

    fn spawn(script: &'static str) -> WorkerHandle<AnalysisJob> {
        let run = NeEstimationRun::new(Vec::new(), "/tmp/fanout-group-test");
        let job = Arc::new(JobDescriptor::new(0, AnalysisJob::from(run)));
        WorkerHandle::spawn(job, &Sh(script)).unwrap()
    }

    #[tokio::test]
    async fn exited_workers_move_to_reaped() {
        let mut group = ProcessGroup::new();
        group.add(spawn("exit 0")).unwrap();
        group.add(spawn("sleep 30")).unwrap();

        let live = group.settle(Duration::from_millis(500), Duration::from_millis(10)).await;
        assert_eq!(live, 1);

        let reaped = group.take_reaped();
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].terminal_status(), Some(JobStatus::Succeeded));
        assert!(group.take_reaped().is_empty());

        group.kill_all();
        assert_eq!(
            group.settle(Duration::from_secs(5), Duration::from_millis(10)).await,
            0
        );
        assert!(group.is_empty());
        assert_eq!(group.take_reaped()[0].terminal_status(), Some(JobStatus::Killed));
    }

    #[tokio::test]
    async fn duplicate_job_is_rejected() {
        let mut group = ProcessGroup::new();
        let first = spawn("sleep 30");
        let job = Arc::clone(first.job());
        group.add(first).unwrap();

        let duplicate = WorkerHandle::spawn(job, &Sh("sleep 30")).unwrap();
        let err = group.add(duplicate).unwrap_err();
        assert!(matches!(err, FanoutError::DuplicateWorker(_)));
        assert_eq!(group.live_count(), 1);

        group.kill_all();
    }

    #[tokio::test]
    async fn overdue_workers_are_timed_out() {
        let mut group = ProcessGroup::new();
        group.add(spawn("sleep 30")).unwrap();

        assert_eq!(group.kill_overdue(Duration::from_secs(60)), 0);
        assert_eq!(group.kill_overdue(Duration::ZERO), 1);
        assert_eq!(group.kill_overdue(Duration::ZERO), 0);

        group.settle(Duration::from_secs(5), Duration::from_millis(10)).await;
        assert_eq!(group.take_reaped()[0].terminal_status(), Some(JobStatus::TimedOut));
    }
}
