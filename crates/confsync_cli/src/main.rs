//! confsync CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Configuration error
//! - 3: One-shot run with failed resources

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod settings;

use commands::{Cli, Commands};
use confsync_backends::BackendError;
use confsync_core::{ConfigError, ErrorKind, SyncError};
use settings::{Settings, SettingsError};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const CONFIG_ERROR: u8 = 2;
    pub const SYNC_FAILURE: u8 = 3;
}

const DEFAULT_LOG_FILTER: &str = "confsync=info,warn";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let args = match &cli.command {
        Commands::Run(args) => &args.settings,
        Commands::Validate(args) => &args.settings,
    };

    let settings = match Settings::load(args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    if let Err(e) = init_logging(settings.log_level.as_deref()) {
        eprintln!("❌ Error: {:#}", e);
        return ExitCode::from(ExitCodes::CONFIG_ERROR);
    }

    let result = match cli.command {
        Commands::Run(_) => {
            let stop = CancellationToken::new();
            tokio::spawn(stop_on_signal(stop.clone()));
            commands::run::execute(&settings, stop).await.map(|report| {
                if settings.onetime && !report.is_success() {
                    for failed in report.failed() {
                        eprintln!(
                            "❌ {}: {}",
                            failed.name,
                            failed.last_error.as_deref().unwrap_or("failed")
                        );
                    }
                    ExitCodes::SYNC_FAILURE
                } else {
                    ExitCodes::SUCCESS
                }
            })
        }
        Commands::Validate(_) => commands::validate::execute(&settings)
            .await
            .map(|()| ExitCodes::SUCCESS),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Install the global subscriber. An explicit level wins over `RUST_LOG`.
fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(format!("confsync={},warn", level))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }
    Ok(())
}

/// Cancel `stop` on SIGINT or SIGTERM.
async fn stop_on_signal(stop: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, stopping"),
                    _ = term.recv() => info!("Received SIGTERM, stopping"),
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received SIGINT, stopping");
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, stopping");
        }
    }
    stop.cancel();
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    let is_config = e.chain().any(|cause| {
        cause.is::<ConfigError>()
            || cause.is::<BackendError>()
            || cause.is::<SettingsError>()
            || cause
                .downcast_ref::<SyncError>()
                .is_some_and(|s| s.kind() == ErrorKind::Config)
    });
    if is_config {
        ExitCodes::CONFIG_ERROR
    } else {
        ExitCodes::GENERAL_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_categorize_config_errors() {
        let err = anyhow::Error::from(ConfigError::EmptySrc("app".into())).context("loading");
        assert_eq!(categorize_error(&err), ExitCodes::CONFIG_ERROR);

        let err: anyhow::Error = SyncError::from(ConfigError::NoResources("/etc".into())).into();
        assert_eq!(categorize_error(&err), ExitCodes::CONFIG_ERROR);

        let err = Err::<(), _>(BackendError::NoNodes("json".into()))
            .context("Cannot create backend client")
            .unwrap_err();
        assert_eq!(categorize_error(&err), ExitCodes::CONFIG_ERROR);
    }

    #[test]
    fn test_categorize_general_errors() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(categorize_error(&err), ExitCodes::GENERAL_ERROR);
    }
}
