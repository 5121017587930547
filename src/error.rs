use std::fmt;
use std::io;

use thiserror::Error;

use crate::thread_pool::Job;

/// Error type for worker group construction and configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// The group was configured in a way that can never work,
    /// e.g. with zero workers.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// IO error while reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed.
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type alias for worker group operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A job was not accepted by the group.
///
/// The rejected job is handed back so the caller can retry, run it
/// inline, or drop it.
#[derive(Error)]
pub enum TryAddError {
    /// The queue is at `max_queue_len`.
    #[error("job queue is full")]
    Full(Job),

    /// The group is stopping or stopped.
    #[error("worker group is not running")]
    Stopped(Job),
}

impl TryAddError {
    /// Takes back ownership of the rejected job.
    pub fn into_job(self) -> Job {
        match self {
            TryAddError::Full(job) | TryAddError::Stopped(job) => job,
        }
    }

    /// Returns `true` if the job was rejected for lack of queue capacity.
    pub fn is_full(&self) -> bool {
        matches!(self, TryAddError::Full(_))
    }

    /// Returns `true` if the job was rejected because the group is shutting down.
    pub fn is_stopped(&self) -> bool {
        matches!(self, TryAddError::Stopped(_))
    }
}

impl fmt::Debug for TryAddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryAddError::Full(_) => f.write_str("Full(..)"),
            TryAddError::Stopped(_) => f.write_str("Stopped(..)"),
        }
    }
}

/// The result of a job submitted through [`WorkerGroup::run`] never arrived.
///
/// [`WorkerGroup::run`]: crate::WorkerGroup::run
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobError {
    /// The job panicked, or was discarded at shutdown before it ran.
    #[error("job panicked or was abandoned before producing a result")]
    Lost,
}
