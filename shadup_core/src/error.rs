//! Error types for shadup_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using shadup_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during store operations.
///
/// Per-item problems inside a batch (an unreadable file, a missing blob, a
/// digest mismatch) are not errors: they are logged and counted in the
/// operation's stats. Everything here aborts the operation.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// The catalog database failed.
    #[error("Catalog error: {source}")]
    Catalog {
        #[from]
        source: rusqlite::Error,
    },

    /// Invalid digest format or encoding.
    #[error("Invalid digest: {reason}")]
    InvalidDigest { reason: String },

    /// Store location is unusable.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// A path has the wrong shape for the operation, e.g. a directory where a
    /// file destination is expected.
    #[error("Path conflict at {path}: {reason}")]
    PathConflict { path: PathBuf, reason: String },

    /// A root given to an operation does not exist.
    #[error("Root not found: {path}")]
    RootNotFound { path: PathBuf },

    /// An option value is out of range.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Internal logic error. Never caused by bad input.
    #[error("Invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

impl Error {
    /// Create an InvalidDigest error.
    pub fn invalid_digest(reason: impl Into<String>) -> Self {
        Error::InvalidDigest {
            reason: reason.into(),
        }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a PathConflict error.
    pub fn path_conflict(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::PathConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a RootNotFound error.
    pub fn root_not_found(path: impl Into<PathBuf>) -> Self {
        Error::RootNotFound { path: path.into() }
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an InvariantViolation error.
    pub fn invariant(reason: impl Into<String>) -> Self {
        Error::InvariantViolation {
            reason: reason.into(),
        }
    }

    /// True for errors that reflect bad input or configuration rather than
    /// I/O or catalog failures.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidStore { .. }
                | Error::PathConflict { .. }
                | Error::RootNotFound { .. }
                | Error::InvalidArgument { .. }
        )
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::Io {
            source: std::io::Error::other(err.to_string()),
        }
    }
}
