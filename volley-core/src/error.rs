//! Error types shared by every Volley crate
//!
//! Each variant maps to exactly one [`ErrorKind`]; boundary layers decide how
//! a kind is surfaced (HTTP status, exit code) without matching on messages.

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Another operation already holds one of the requested hosts
    #[error("{0}")]
    Conflict(String),

    /// Unknown job id
    #[error("{0}")]
    NotFound(String),

    /// Deletion refused (job still running)
    #[error("{0}")]
    Delete(String),

    /// Operation invoked in an invalid mode, or unknown task plugin type
    #[error("{0}")]
    NotSupported(String),

    /// Request arguments rejected before any job was created
    #[error("{0}")]
    Invalid(String),

    /// Execution engine or task plugin failed to initialize
    #[error("{0}")]
    Prepare(String),

    /// Failure while running against remote hosts
    #[error("{0}")]
    Execution(String),

    /// Target pattern matched nothing, or hosts missing from a result stream
    #[error("{0}")]
    NoMatch(String),

    /// Task plugin stopped the task on purpose; the job still counts as done
    #[error("{0}")]
    TaskAbort(String),

    /// Task plugin reported a task-level failure
    #[error("{0}")]
    Task(String),

    /// Job state transition refused
    #[error("{0}")]
    InvalidState(String),

    /// Stored job data could not be decoded
    #[error("corrupted job record <{key}>: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fieldless tag of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Delete,
    NotSupported,
    Invalid,
    Prepare,
    Execution,
    NoMatch,
    TaskAbort,
    Task,
    InvalidState,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Delete(_) => ErrorKind::Delete,
            Error::NotSupported(_) => ErrorKind::NotSupported,
            Error::Invalid(_) => ErrorKind::Invalid,
            Error::Prepare(_) => ErrorKind::Prepare,
            Error::Execution(_) => ErrorKind::Execution,
            Error::NoMatch(_) => ErrorKind::NoMatch,
            Error::TaskAbort(_) => ErrorKind::TaskAbort,
            Error::Task(_) => ErrorKind::Task,
            Error::InvalidState(_) => ErrorKind::InvalidState,
            Error::Corrupted { .. } | Error::Store(_) | Error::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Errors raised by the execution engine itself, as opposed to
    /// unexpected failures in the surrounding code
    pub fn is_engine_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Prepare | ErrorKind::Execution | ErrorKind::NoMatch
        )
    }
}
