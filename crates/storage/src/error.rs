//! Repository error types.

use thiserror::Error;

/// Repository lookup errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The path exists but resolves outside the repository root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl RepositoryError {
    /// Map an I/O error, keeping "not found" distinct from other failures.
    ///
    /// A path that walks through a regular file, or names a directory where
    /// a file is expected, does not exist in the repository layout.
    pub(crate) fn from_io(err: std::io::Error, what: impl Into<String>) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::NotADirectory | ErrorKind::IsADirectory => {
                Self::NotFound(what.into())
            }
            _ => Self::Io(err),
        }
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;
