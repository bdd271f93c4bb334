use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::path::Path;
use std::process::ExitStatus;
use std::str::FromStr;
use uuid::Uuid;

/// Closed set of worker entry points for one job family.
///
/// The string returned by [`JobKind::as_str`] is what a worker binary sees as
/// its subcommand, so it must stay stable across releases.
pub trait JobKind:
    Copy
    + Eq
    + Hash
    + Display
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn as_str(&self) -> &'static str;

    /// File-name suffixes this kind is known to write under its output prefix.
    fn output_suffixes(&self) -> &'static [&'static str];

    /// Glob fragments matching intermediate files this kind leaves under its
    /// output prefix, matched as `<prefix>*<fragment>` without escaping.
    fn intermediate_patterns(&self) -> &'static [&'static str] {
        &[]
    }
}

/// A typed argument bundle for one unit of work.
pub trait Job:
    Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Kind: JobKind;

    fn kind(&self) -> Self::Kind;

    /// Path prefix under which this job writes its output files.
    ///
    /// Prefixes of jobs in the same run must be disjoint.
    fn output_prefix(&self) -> &Path;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One queued unit of work: the job payload plus its identity in the run.
///
/// Descriptors are immutable once built; the scheduler shares them behind an
/// `Arc` between the queue side-list and the worker executing them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobDescriptor<J> {
    id: JobId,
    sequence: usize,
    job: J,
}

impl<J: Job> JobDescriptor<J> {
    pub fn new(sequence: usize, job: J) -> Self {
        Self {
            id: JobId::new(),
            sequence,
            job,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Zero-based position of this job in the queue it was built from.
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn entry_point(&self) -> J::Kind {
        self.job.kind()
    }

    pub fn output_prefix(&self) -> &Path {
        self.job.output_prefix()
    }

    pub fn known_suffixes(&self) -> &'static [&'static str] {
        self.job.kind().output_suffixes()
    }

    pub fn intermediate_patterns(&self) -> &'static [&'static str] {
        self.job.kind().intermediate_patterns()
    }
}

/// Observed state of a worker process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    Running,
    /// Exited on its own. `None` when the exit could not be observed.
    Exited(Option<ExitStatus>),
    /// Terminated by an explicit kill from the orchestrator.
    Killed,
}

/// Terminal status of one job in a run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed { exit_code: Option<i32> },
    Killed,
    TimedOut,
    SpawnFailed { error: String },
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed { .. } => "failed",
            JobStatus::Killed => "killed",
            JobStatus::TimedOut => "timed_out",
            JobStatus::SpawnFailed { .. } => "spawn_failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    /// Whether the orchestrator stopped the job before it exited on its own.
    pub fn was_interrupted(&self) -> bool {
        matches!(self, JobStatus::Killed | JobStatus::TimedOut)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Failed {
                exit_code: Some(code),
            } => write!(f, "failed (exit code {code})"),
            JobStatus::SpawnFailed { error } => {
                write!(f, "spawn failed: {error}")
            }
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum Kind {
        Estimate,
    }

    impl Display for Kind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    impl JobKind for Kind {
        fn as_str(&self) -> &'static str {
            "estimate"
        }

        fn output_suffixes(&self) -> &'static [&'static str] {
            &["ldne.tsv"]
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Estimate {
        prefix: PathBuf,
    }

    impl Job for Estimate {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            Kind::Estimate
        }

        fn output_prefix(&self) -> &Path {
            &self.prefix
        }
    }

    #[test]
    fn descriptor_exposes_job_conventions() {
        let descriptor = JobDescriptor::new(
            3,
            Estimate {
                prefix: PathBuf::from("/tmp/run."),
            },
        );

        assert_eq!(descriptor.sequence(), 3);
        assert_eq!(descriptor.entry_point().as_str(), "estimate");
        assert_eq!(descriptor.output_prefix(), Path::new("/tmp/run."));
        assert_eq!(descriptor.known_suffixes(), &["ldne.tsv"]);
    }

    #[test]
    fn job_ids_parse_from_display() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn interrupted_statuses() {
        assert!(JobStatus::Killed.was_interrupted());
        assert!(JobStatus::TimedOut.was_interrupted());
        assert!(!JobStatus::Succeeded.was_interrupted());
        assert!(!JobStatus::Failed { exit_code: Some(1) }.was_interrupted());
        assert_eq!(
            JobStatus::Failed { exit_code: Some(2) }.to_string(),
            "failed (exit code 2)"
        );
    }
}
