//! Error types for the process supervisor and status poller

use std::path::PathBuf;

use thiserror::Error;

use super::poller::PollerState;

/// Errors surfaced by [`ProcessSupervisor`](super::ProcessSupervisor) operations
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Executable does not exist at the resolved path
    #[error("Executable not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The OS refused to create the process
    #[error("Failed to spawn {}: {source}", path.display())]
    SpawnFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The OS refused to kill the process
    #[error("Failed to terminate process {pid}: {source}")]
    TerminationFailed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Supervisor lock poisoned: {0}")]
    LockPoisoned(String),

    /// Status polling needs a tokio runtime and none was configured or current
    #[error("No tokio runtime available for status polling")]
    NoRuntime,
}

/// Errors surfaced by [`StatusPoller`](super::StatusPoller)
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PollerError {
    /// Pollers run once; a stopped poller cannot be restarted
    #[error("Poller is not idle (state: {0:?})")]
    NotIdle(PollerState),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
