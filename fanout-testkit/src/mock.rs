use fanout::{CancellationSignal, JobDescriptor, JobId, RuntimeInvoker};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use crate::TestJob;

/// Runs a [`TestJob`] through `sh -c`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShellInvoker;

impl RuntimeInvoker<TestJob> for ShellInvoker {
    fn command(&self, job: &JobDescriptor<TestJob>) -> anyhow::Result<Command> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(job.job().script())
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        Ok(command)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvocationRecord {
    pub job_id: JobId,
    pub sequence: usize,
}

/// Wraps an invoker, recording every command request and optionally setting
/// a cancellation signal once a given number of requests has been made.
#[derive(Clone)]
pub struct RecordingInvoker {
    inner: Arc<dyn RuntimeInvoker<TestJob>>,
    calls: Arc<Mutex<Vec<InvocationRecord>>>,
    cancel_after: Option<(usize, CancellationSignal)>,
}

impl RecordingInvoker {
    pub fn new(inner: Arc<dyn RuntimeInvoker<TestJob>>) -> Self {
        Self {
            inner,
            calls: Arc::new(Mutex::new(Vec::new())),
            cancel_after: None,
        }
    }

    pub fn shell() -> Self {
        Self::new(Arc::new(ShellInvoker))
    }

    /// Set `signal` as soon as the `n`-th command has been built.
    pub fn cancel_after(mut self, n: usize, signal: CancellationSignal) -> Self {
        self.cancel_after = Some((n, signal));
        self
    }

    pub fn calls(&self) -> Vec<InvocationRecord> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn assert_call_count_eq(&self, expected: usize) {
        let actual = self.call_count();
        assert_eq!(
            actual, expected,
            "Expected {expected} invocations, got {actual}"
        );
    }
}

impl RuntimeInvoker<TestJob> for RecordingInvoker {
    fn command(&self, job: &JobDescriptor<TestJob>) -> anyhow::Result<Command> {
        let command = self.inner.command(job)?;
        let count = {
            let mut calls = self.calls.lock();
            calls.push(InvocationRecord {
                job_id: job.id(),
                sequence: job.sequence(),
            });
            calls.len()
        };
        if let Some((n, signal)) = &self.cancel_after {
            if count == *n {
                tracing::debug!(count, "test invoker setting cancellation");
                signal.set();
            }
        }
        Ok(command)
    }
}

/// Wraps an invoker so that chosen queue positions fail to spawn with
/// permission denied: their command points at a file without execute bits.
pub struct FailingInvoker {
    inner: Arc<dyn RuntimeInvoker<TestJob>>,
    failing: HashSet<usize>,
    program: PathBuf,
    _dir: tempfile::TempDir,
}

impl FailingInvoker {
    pub fn new(
        inner: Arc<dyn RuntimeInvoker<TestJob>>,
        failing_sequences: impl IntoIterator<Item = usize>,
    ) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let program = dir.path().join("not-executable");
        std::fs::write(&program, "#!/bin/sh\nexit 0\n")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &program,
                std::fs::Permissions::from_mode(0o644),
            )?;
        }
        Ok(Self {
            inner,
            failing: failing_sequences.into_iter().collect(),
            program,
            _dir: dir,
        })
    }
}

impl RuntimeInvoker<TestJob> for FailingInvoker {
    fn command(&self, job: &JobDescriptor<TestJob>) -> anyhow::Result<Command> {
        if self.failing.contains(&job.sequence()) {
            return Ok(Command::new(&self.program));
        }
        self.inner.command(job)
    }
}
