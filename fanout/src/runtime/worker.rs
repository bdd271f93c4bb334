use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Child;

use crate::error::{FanoutError, Result};
use crate::invoker::RuntimeInvoker;
use crate::job::{Job, JobDescriptor, JobId, JobStatus, WorkerState};

/// One OS process executing exactly one job.
///
/// The child is spawned with `kill_on_drop`, and on Unix in a process group
/// of its own so that [`kill`](Self::kill) also reaches anything the worker
/// started.
#[derive(Debug)]
pub struct WorkerHandle<J: Job> {
    job: Arc<JobDescriptor<J>>,
    child: Child,
    pid: Option<u32>,
    spawned_at: Instant,
    /// Set when the worker was killed or its exit was observed.
    stopped_after: Option<Duration>,
    state: WorkerState,
    /// Exit confirmed by the OS.
    reaped: bool,
    timed_out: bool,
}

impl<J: Job> WorkerHandle<J> {
    pub fn spawn(
        job: Arc<JobDescriptor<J>>,
        invoker: &dyn RuntimeInvoker<J>,
    ) -> Result<Self> {
        let mut command =
            invoker.command(&job).map_err(|err| FanoutError::Invoke {
                job_id: job.id(),
                message: format!("{err:#}"),
            })?;
        command.kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| FanoutError::Spawn {
            job_id: job.id(),
            source,
        })?;
        let pid = child.id();

        Ok(Self {
            job,
            child,
            pid,
            spawned_at: Instant::now(),
            stopped_after: None,
            state: WorkerState::Running,
            reaped: false,
            timed_out: false,
        })
    }

    pub fn job(&self) -> &Arc<JobDescriptor<J>> {
        &self.job
    }

    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Time since spawn, still counting after the worker stopped.
    pub fn elapsed(&self) -> Duration {
        self.spawned_at.elapsed()
    }

    /// Time from spawn until the worker was killed or seen to exit, or the
    /// time so far while it runs.
    pub fn run_time(&self) -> Duration {
        self.stopped_after.unwrap_or_else(|| self.elapsed())
    }

    fn mark_stopped(&mut self) {
        if self.stopped_after.is_none() {
            self.stopped_after = Some(self.elapsed());
        }
    }

    /// Non-blocking liveness check.
    ///
    /// A killed worker stays alive until the OS confirms its exit.
    pub fn is_alive(&mut self) -> bool {
        if self.reaped {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.mark_reaped(Some(status));
                false
            }
            Err(err) => {
                tracing::warn!(
                    job_id = %self.job.id(),
                    "failed to poll worker, treating it as exited: {err}"
                );
                self.mark_reaped(None);
                false
            }
        }
    }

    /// Forcibly terminate the worker and its process group. Idempotent.
    ///
    /// A worker that already exited keeps its `Exited` state.
    pub fn kill(&mut self) {
        if self.state != WorkerState::Running || !self.is_alive() {
            return;
        }

        #[cfg(unix)]
        if let Some(pid) = self.pid {
            kill_process_group(pid);
        }
        if let Err(err) = self.child.start_kill() {
            tracing::debug!(job_id = %self.job.id(), "start_kill failed: {err}");
        }
        self.state = WorkerState::Killed;
        self.mark_stopped();
    }

    /// Kill the worker because it ran past its deadline.
    pub fn kill_for_timeout(&mut self) {
        self.kill();
        if self.state == WorkerState::Killed {
            self.timed_out = true;
        }
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Status to record for this job, or `None` while it is still running.
    pub fn terminal_status(&self) -> Option<JobStatus> {
        match self.state {
            WorkerState::Running => None,
            WorkerState::Killed if self.timed_out => Some(JobStatus::TimedOut),
            WorkerState::Killed => Some(JobStatus::Killed),
            WorkerState::Exited(Some(status)) if status.success() => {
                Some(JobStatus::Succeeded)
            }
            WorkerState::Exited(status) => Some(JobStatus::Failed {
                exit_code: status.and_then(|s| s.code()),
            }),
        }
    }

    fn mark_reaped(&mut self, status: Option<std::process::ExitStatus>) {
        self.reaped = true;
        self.mark_stopped();
        if self.state == WorkerState::Running {
            self.state = WorkerState::Exited(status);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => {
            tracing::warn!(pid, "SIGKILL to worker process group failed: {err}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::families::{AnalysisJob, NeEstimationRun};
    use tokio::process::Command;

    struct Sh(String);

    fn sh(script: impl Into<String>) -> Sh {
        Sh(script.into())
    }

    impl RuntimeInvoker<AnalysisJob> for Sh {
        fn command(
            &self,
            _job: &JobDescriptor<AnalysisJob>,
        ) -> anyhow::Result<Command> {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&self.0);
            Ok(command)
        }
    }

    struct Broken;

    impl RuntimeInvoker<AnalysisJob> for Broken {
        fn command(
            &self,
            _job: &JobDescriptor<AnalysisJob>,
        ) -> anyhow::Result<Command> {
            anyhow::bail!("no worker binary configured")
        }
    }

    fn descriptor() -> Arc<JobDescriptor<AnalysisJob>> {
        let run = NeEstimationRun::new(Vec::new(), "/tmp/fanout-worker-test");
        Arc::new(JobDescriptor::new(0, AnalysisJob::from(run)))
    }

    async fn wait_until_dead(handle: &mut WorkerHandle<AnalysisJob>) {
        for _ in 0..200 {
            if !handle.is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker still alive after 2 seconds");
    }

    #[tokio::test]
    async fn exit_codes_map_to_statuses() {
        let mut ok = WorkerHandle::spawn(descriptor(), &sh("exit 0")).unwrap();
        let mut failed =
            WorkerHandle::spawn(descriptor(), &sh("exit 3")).unwrap();

        wait_until_dead(&mut ok).await;
        wait_until_dead(&mut failed).await;

        assert_eq!(ok.terminal_status(), Some(JobStatus::Succeeded));
        assert_eq!(
            failed.terminal_status(),
            Some(JobStatus::Failed { exit_code: Some(3) })
        );
    }

    #[tokio::test]
    async fn kill_is_idempotent_and_marks_killed() {
        let mut handle =
            WorkerHandle::spawn(descriptor(), &sh("sleep 30")).unwrap();
        assert!(handle.is_alive());
        assert!(handle.pid().is_some());
        assert_eq!(handle.terminal_status(), None);

        handle.kill();
        handle.kill();
        wait_until_dead(&mut handle).await;
        handle.kill();

        assert_eq!(handle.state(), WorkerState::Killed);
        assert_eq!(handle.terminal_status(), Some(JobStatus::Killed));
    }

    #[tokio::test]
    async fn kill_reaches_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let script = format!("(sleep 0.3; touch {}) & wait", marker.display());
        let mut handle = WorkerHandle::spawn(descriptor(), &sh(script)).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.kill();
        wait_until_dead(&mut handle).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(!marker.exists(), "background child survived the kill");
    }

    #[tokio::test]
    async fn killing_an_exited_worker_keeps_its_exit() {
        let mut handle = WorkerHandle::spawn(descriptor(), &sh("exit 0")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        handle.kill();

        assert_eq!(handle.terminal_status(), Some(JobStatus::Succeeded));
    }

    #[tokio::test]
    async fn run_time_stops_at_kill() {
        let mut handle =
            WorkerHandle::spawn(descriptor(), &sh("sleep 30")).unwrap();
        handle.kill();
        let at_kill = handle.run_time();
        wait_until_dead(&mut handle).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(handle.run_time(), at_kill);
        assert!(handle.elapsed() >= at_kill + Duration::from_millis(300));
    }

    #[tokio::test]
    async fn run_time_stops_when_exit_is_observed() {
        let mut handle = WorkerHandle::spawn(descriptor(), &sh("exit 0")).unwrap();
        wait_until_dead(&mut handle).await;
        let at_exit = handle.run_time();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(handle.run_time(), at_exit);
        assert!(at_exit < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn timeout_kill_is_reported_separately() {
        let mut handle =
            WorkerHandle::spawn(descriptor(), &sh("sleep 30")).unwrap();
        handle.kill_for_timeout();
        wait_until_dead(&mut handle).await;

        assert!(handle.timed_out());
        assert_eq!(handle.terminal_status(), Some(JobStatus::TimedOut));
    }

    #[tokio::test]
    async fn invoker_and_spawn_failures_are_typed() {
        let err = WorkerHandle::spawn(descriptor(), &Broken).unwrap_err();
        assert!(matches!(err, FanoutError::Invoke { .. }), "{err}");

        struct Missing;
        impl RuntimeInvoker<AnalysisJob> for Missing {
            fn command(
                &self,
                _job: &JobDescriptor<AnalysisJob>,
            ) -> anyhow::Result<Command> {
                Ok(Command::new("/nonexistent/fanout-worker"))
            }
        }
        let err = WorkerHandle::spawn(descriptor(), &Missing).unwrap_err();
        assert!(matches!(err, FanoutError::Spawn { .. }), "{err}");
    }
}
