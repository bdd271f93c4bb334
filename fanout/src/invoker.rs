//! Turning job descriptors into worker processes.
//!
//! A [`RuntimeInvoker`] builds the command that runs one job. The built-in
//! [`WorkerBinaryInvoker`] runs a worker binary with the job's entry point as
//! its subcommand and the job payload as JSON:
//!
//! ```text
//! <program> [leading args...] <entry-point> --job-id <uuid> --payload <json>
//! ```
//!
//! The worker side decodes that argv with [`WorkerInvocation::parse`].

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{FanoutError, Result};
use crate::job::{Job, JobDescriptor, JobId, JobKind};

const JOB_ID_FLAG: &str = "--job-id";
const PAYLOAD_FLAG: &str = "--payload";

/// Builds the OS command that executes one job.
///
/// Implementations must be deterministic: the same descriptor always yields
/// the same program, arguments and environment.
pub trait RuntimeInvoker<J: Job>: Send + Sync {
    fn command(&self, job: &JobDescriptor<J>) -> anyhow::Result<Command>;
}

/// Runs jobs through a dedicated worker binary (or the current executable
/// re-entered through a worker subcommand).
#[derive(Clone, Debug)]
pub struct WorkerBinaryInvoker {
    program: PathBuf,
    leading_args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    quiet: bool,
}

impl WorkerBinaryInvoker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            quiet: false,
        }
    }

    /// Re-execute the running binary, passing `subcommand` before the entry
    /// point so the binary can tell it is being run as a worker.
    pub fn current_exe(subcommand: impl Into<String>) -> anyhow::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program).with_arg(subcommand))
    }

    /// Append an argument placed before the entry point.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    /// Set an environment variable for every worker.
    pub fn with_env(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run workers from `dir` instead of the caller's working directory.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Discard worker stdout and stderr.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// The argv (without the program) used for `job`.
    pub fn args_for<J: Job>(
        &self,
        job: &JobDescriptor<J>,
    ) -> anyhow::Result<Vec<String>> {
        let payload = serde_json::to_string(job.job())?;
        let mut args = self.leading_args.clone();
        args.push(job.entry_point().as_str().to_string());
        args.push(JOB_ID_FLAG.to_string());
        args.push(job.id().to_string());
        args.push(PAYLOAD_FLAG.to_string());
        args.push(payload);
        Ok(args)
    }
}

impl<J: Job> RuntimeInvoker<J> for WorkerBinaryInvoker {
    fn command(&self, job: &JobDescriptor<J>) -> anyhow::Result<Command> {
        let mut command = Command::new(&self.program);
        command.args(self.args_for(job)?);
        command.envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command.stdin(Stdio::null());
        if self.quiet {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        Ok(command)
    }
}

/// A job decoded from a worker process's argv.
#[derive(Clone, Debug)]
pub struct WorkerInvocation<J> {
    pub job_id: JobId,
    pub job: J,
}

impl<J: Job> WorkerInvocation<J> {
    /// Decode `<entry-point> --job-id <uuid> --payload <json>`.
    ///
    /// `args` must start at the entry point, i.e. after the program name and
    /// any leading worker subcommand.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let entry_point = args
            .next()
            .ok_or_else(|| FanoutError::Invocation("missing entry point".into()))?;

        let mut job_id = None;
        let mut payload = None;
        while let Some(flag) = args.next() {
            let value = args.next().ok_or_else(|| {
                FanoutError::Invocation(format!("{flag} requires a value"))
            })?;
            match flag.as_str() {
                JOB_ID_FLAG => {
                    let id = value.parse::<JobId>().map_err(|err| {
                        FanoutError::Invocation(format!("bad job id: {err}"))
                    })?;
                    job_id = Some(id);
                }
                PAYLOAD_FLAG => payload = Some(value),
                other => {
                    return Err(FanoutError::Invocation(format!(
                        "unexpected argument {other}"
                    )));
                }
            }
        }

        let job_id = job_id.ok_or_else(|| {
            FanoutError::Invocation(format!("missing {JOB_ID_FLAG}"))
        })?;
        let payload = payload.ok_or_else(|| {
            FanoutError::Invocation(format!("missing {PAYLOAD_FLAG}"))
        })?;
        let job: J = serde_json::from_str(&payload)?;

        if job.kind().as_str() != entry_point {
            return Err(FanoutError::Invocation(format!(
                "entry point {entry_point} does not match payload kind {}",
                job.kind()
            )));
        }

        Ok(Self { job_id, job })
    }
}
