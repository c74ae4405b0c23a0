//! Error types for the synchronization pipeline.

use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for backend operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for template helper functions.
pub type FuncResult<T> = Result<T, FuncError>;

/// Errors reported by a [`StoreClient`](crate::store::StoreClient).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Watch failed on {prefix}: {message}")]
    Watch { prefix: String, message: String },

    #[error("Invalid backend data in {origin}: {message}")]
    InvalidData { origin: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading resource or process configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot process template resource {origin}: {message}")]
    Parse { origin: String, message: String },

    #[error("Template resource {0} has an empty src")]
    EmptySrc(String),

    #[error("Template resource {0} has an empty dest")]
    EmptyDest(String),

    #[error("Template resource {origin} has an invalid mode {mode:?}")]
    InvalidMode { origin: String, mode: String },

    #[error("No template resources found in {0:?}")]
    NoResources(PathBuf),

    #[error("No template resources to run")]
    EmptyResourceSet,
}

/// Errors raised by the key/value mirror.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Invalid glob pattern {pattern:?}: {message}")]
    BadPattern { pattern: String, message: String },
}

/// Errors raised by template helper functions.
#[derive(Error, Debug)]
pub enum FuncError {
    #[error("key does not exist: {0}")]
    KeyNotFound(String),

    #[error("not a number: {0}")]
    NotNumeric(String),

    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    #[error("invalid byte count {input:?}: {source}")]
    ByteCount {
        input: String,
        #[source]
        source: ParseIntError,
    },

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Backend,
    Render,
    Commit,
    CheckFailed,
    ReloadFailed,
    Config,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Backend => "backend",
            Self::Render => "render",
            Self::Commit => "commit",
            Self::CheckFailed => "check_failed",
            Self::ReloadFailed => "reload_failed",
            Self::Config => "config",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Errors that abort one pipeline cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Backend error: {0}")]
    Backend(#[from] StoreError),

    #[error("Render failed for {template}: {source}")]
    Render {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("Commit to {path:?} failed: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Check command {command:?} failed (status {status:?}): {output}")]
    CheckFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("Reload command {command:?} failed (status {status:?}): {output}")]
    ReloadFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cycle cancelled by stop signal")]
    Cancelled,
}

impl SyncError {
    pub fn commit(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Commit {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Backend(_) => ErrorKind::Backend,
            Self::Render { .. } => ErrorKind::Render,
            Self::Commit { .. } => ErrorKind::Commit,
            Self::CheckFailed { .. } => ErrorKind::CheckFailed,
            Self::ReloadFailed { .. } => ErrorKind::ReloadFailed,
            Self::Config(_) => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the destination may already hold the new content.
    pub fn is_post_commit(&self) -> bool {
        matches!(self, Self::ReloadFailed { .. })
    }
}
