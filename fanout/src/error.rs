use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobId;

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("Could not build worker command for job {job_id}: {message}")]
    Invoke { job_id: JobId, message: String },

    #[error("Failed to spawn worker for job {job_id}: {source}")]
    Spawn {
        job_id: JobId,
        #[source]
        source: std::io::Error,
    },

    #[error("Job {0} already has a worker in this group")]
    DuplicateWorker(JobId),

    #[error("Invalid worker invocation: {0}")]
    Invocation(String),

    #[error("Job payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FanoutError>;

/// A file the cleaner expected to remove but could not.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub message: String,
}

impl CleanupWarning {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
