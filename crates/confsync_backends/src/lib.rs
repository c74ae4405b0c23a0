//! # confsync backends
//!
//! [`StoreClient`] implementations over concrete key/value sources:
//!
//! - [`JsonClient`]: one or more JSON files, watched by polling
//! - [`EnvClient`]: process environment variables, no watch
//! - [`MemoryClient`]: an in-process store with change notifications

pub mod env;
pub mod error;
pub mod json;
pub mod memory;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use confsync_core::StoreClient;

pub use env::EnvClient;
pub use error::{BackendError, BackendResult};
pub use json::JsonClient;
pub use memory::MemoryClient;

/// Supported backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Env,
    Json,
    Memory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Env => "env",
            Self::Json => "json",
            Self::Memory => "memory",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for BackendKind {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "env" => Ok(Self::Env),
            "json" => Ok(Self::Json),
            "memory" => Ok(Self::Memory),
            other => Err(BackendError::Unknown(other.to_string())),
        }
    }
}

/// Settings needed to build a backend client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Backend nodes; file paths for `json`
    pub nodes: Vec<PathBuf>,
    /// Poll interval for backends that watch by polling
    pub poll_interval: Option<Duration>,
}

impl BackendConfig {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn node(mut self, node: impl Into<PathBuf>) -> Self {
        self.nodes.push(node.into());
        self
    }
}

/// Build the client described by `config`.
pub fn new_client(config: &BackendConfig) -> BackendResult<Arc<dyn StoreClient>> {
    tracing::info!("Backend set to {}", config.kind);
    let client: Arc<dyn StoreClient> = match config.kind {
        BackendKind::Env => Arc::new(EnvClient::new()),
        BackendKind::Memory => Arc::new(MemoryClient::new()),
        BackendKind::Json => {
            let mut client = JsonClient::new(config.nodes.clone())?;
            if let Some(interval) = config.poll_interval {
                client = client.with_poll_interval(interval);
            }
            Arc::new(client)
        }
    };
    Ok(client)
}
