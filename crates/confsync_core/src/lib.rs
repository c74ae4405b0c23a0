//! # confsync core
//!
//! Keeps local configuration files in sync with a key/value backend.
//!
//! A [`TemplateResource`] pairs a template with a destination file and a set
//! of backend key prefixes. Each cycle mirrors the backend values, renders the
//! template, and atomically replaces the destination when the output differs,
//! guarded by an optional check command and followed by an optional reload
//! command. [`ResourceDriver`] schedules those cycles once, on an interval or
//! on backend change notifications.
//!
//! ```no_run
//! use std::sync::Arc;
//! use confsync_core::{ResourceLoader, ResourceDriver, StoreClient, SyncMode, SyncOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(client: Arc<dyn StoreClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let resources = ResourceLoader::new("/etc/confsync").load_all(client.clone(), &SyncOptions::default())?;
//! let report = ResourceDriver::new(resources, client, SyncMode::Once)?
//!     .run(CancellationToken::new())
//!     .await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod command;
pub mod config;
pub mod driver;
pub mod error;
pub mod funcs;
pub mod loader;
pub mod mirror;
pub mod resource;
pub mod stage;
pub mod store;

pub use backoff::{Backoff, BackoffPolicy};
pub use config::{ResourceConfig, SyncOptions, DEFAULT_FILE_MODE};
pub use driver::{sync_once, ResourceDriver, ResourceReport, SyncMode, SyncReport};
pub use error::{
    ConfigError, ConfigResult, ErrorKind, StoreError, StoreResult, SyncError, SyncResult,
};
pub use funcs::FunctionLibrary;
pub use loader::ResourceLoader;
pub use mirror::{KvMirror, KvPair, SharedMirror};
pub use resource::{CycleOutcome, CycleState, TemplateResource};
pub use store::StoreClient;
