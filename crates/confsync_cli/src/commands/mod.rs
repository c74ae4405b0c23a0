//! CLI command definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use confsync_backends::BackendKind;

pub mod run;
pub mod validate;

/// confsync - keep configuration files in sync with a key/value backend
#[derive(Parser)]
#[command(name = "confsync")]
#[command(version, about = "Keep configuration files in sync with a key/value backend")]
#[command(long_about = r#"
confsync renders templates against values from a key/value backend and
atomically replaces configuration files when the output changes.

COMMANDS:
  run       → Sync once, on an interval or on backend changes
  validate  → Load configuration and template resources without syncing

EXIT CODES:
  0 - Success
  1 - General error
  2 - Configuration error
  3 - One-shot run with failed resources
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize template resources
    Run(run::RunArgs),

    /// Check configuration and template resources
    Validate(validate::ValidateArgs),
}

/// Options shared by every command. Unset options fall back to the
/// configuration file, then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Configuration file [default: <confdir>/confsync.toml]
    #[arg(long, env = "CONFSYNC_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Directory holding conf.d and templates [default: /etc/confsync]
    #[arg(long, env = "CONFSYNC_CONFDIR")]
    pub confdir: Option<PathBuf>,

    /// Backend to read keys from
    #[arg(short, long)]
    pub backend: Option<BackendKind>,

    /// Backend node; a file path for the json backend (repeatable)
    #[arg(short, long = "node")]
    pub nodes: Vec<PathBuf>,

    /// Global key prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// Seconds between polls in interval mode
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Run one cycle per resource and exit
    #[arg(long)]
    pub onetime: bool,

    /// Re-render on backend change notifications
    #[arg(short, long)]
    pub watch: bool,

    /// Render and diff only; never write files or run commands
    #[arg(long)]
    pub noop: bool,

    /// Write files without running check or reload commands
    #[arg(long)]
    pub sync_only: bool,

    /// Log level for confsync crates (error, warn, info, debug, trace)
    #[arg(short, long)]
    pub log_level: Option<String>,
}
