//! Process settings: command line over `confsync.toml` over defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use confsync_backends::{BackendConfig, BackendKind};
use confsync_core::{SyncMode, SyncOptions};

use crate::commands::SettingsArgs;

pub const DEFAULT_CONFDIR: &str = "/etc/confsync";
pub const DEFAULT_INTERVAL_SECS: u64 = 600;
pub const CONFIG_FILE_NAME: &str = "confsync.toml";

/// Errors while building settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Cannot read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Interval must be at least one second")]
    ZeroInterval,

    #[error("--onetime and --watch are mutually exclusive")]
    ConflictingModes,
}

/// Contents of `confsync.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FileSettings {
    pub backend: Option<BackendKind>,
    pub nodes: Option<Vec<PathBuf>>,
    pub confdir: Option<PathBuf>,
    pub interval: Option<u64>,
    pub prefix: Option<String>,
    pub noop: Option<bool>,
    pub onetime: Option<bool>,
    pub watch: Option<bool>,
    pub sync_only: Option<bool>,
    pub log_level: Option<String>,
}

impl FileSettings {
    pub fn parse(text: &str, path: &Path) -> Result<Self, SettingsError> {
        toml::from_str(text).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Read `path`. A missing file is only an error when `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self, SettingsError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                Ok(Self::default())
            }
            Err(source) => Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend: BackendKind,
    pub nodes: Vec<PathBuf>,
    pub confdir: PathBuf,
    pub interval: Duration,
    pub prefix: String,
    pub noop: bool,
    pub onetime: bool,
    pub watch: bool,
    pub sync_only: bool,
    pub log_level: Option<String>,
}

impl Settings {
    /// Read the configuration file named by `args` and merge.
    pub fn load(args: &SettingsArgs) -> Result<Self, SettingsError> {
        let (path, required) = match &args.config_file {
            Some(path) => (path.clone(), true),
            None => {
                let confdir = args
                    .confdir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFDIR));
                (confdir.join(CONFIG_FILE_NAME), false)
            }
        };
        let file = FileSettings::load(&path, required)?;
        Self::merge(args, file)
    }

    /// Command line values win over file values, which win over defaults.
    pub fn merge(args: &SettingsArgs, file: FileSettings) -> Result<Self, SettingsError> {
        let interval = args
            .interval
            .or(file.interval)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        if interval == 0 {
            return Err(SettingsError::ZeroInterval);
        }

        let settings = Self {
            backend: args.backend.or(file.backend).unwrap_or_default(),
            nodes: if args.nodes.is_empty() {
                file.nodes.unwrap_or_default()
            } else {
                args.nodes.clone()
            },
            confdir: args
                .confdir
                .clone()
                .or(file.confdir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFDIR)),
            interval: Duration::from_secs(interval),
            prefix: args
                .prefix
                .clone()
                .or(file.prefix)
                .unwrap_or_else(|| "/".to_string()),
            noop: args.noop || file.noop.unwrap_or(false),
            onetime: args.onetime || (!args.watch && file.onetime.unwrap_or(false)),
            watch: args.watch || (!args.onetime && file.watch.unwrap_or(false)),
            sync_only: args.sync_only || file.sync_only.unwrap_or(false),
            log_level: args.log_level.clone().or(file.log_level),
        };
        if settings.onetime && settings.watch {
            return Err(SettingsError::ConflictingModes);
        }
        Ok(settings)
    }

    pub fn mode(&self) -> SyncMode {
        if self.onetime {
            SyncMode::Once
        } else if self.watch {
            SyncMode::Watch
        } else {
            SyncMode::Interval(self.interval)
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::new()
            .with_prefix(self.prefix.clone())
            .noop(self.noop)
            .sync_only(self.sync_only)
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            kind: self.backend,
            nodes: self.nodes.clone(),
            poll_interval: None,
        }
    }
}
