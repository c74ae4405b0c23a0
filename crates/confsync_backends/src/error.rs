//! Error types for backend construction.

use std::path::PathBuf;

use thiserror::Error;

use confsync_core::StoreError;

/// Result type alias for backend construction.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised while building a backend client.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend {0} needs at least one node")]
    NoNodes(String),

    #[error("Cannot read backend file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed backend file {path:?}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Unknown backend: {0}")]
    Unknown(String),
}

impl From<BackendError> for StoreError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Read { source, .. } => StoreError::Io(source),
            BackendError::Malformed { path, message } => StoreError::InvalidData {
                origin: path.display().to_string(),
                message,
            },
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
