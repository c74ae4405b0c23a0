//! Run command - synchronize template resources.

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use confsync_backends::new_client;
use confsync_core::{ResourceDriver, ResourceLoader, SyncReport};

use super::SettingsArgs;
use crate::settings::Settings;

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

/// Load every resource and drive it until `stop` fires, or for one cycle in
/// one-shot mode.
pub async fn execute(settings: &Settings, stop: CancellationToken) -> Result<SyncReport> {
    info!("Starting confsync {}", env!("CARGO_PKG_VERSION"));

    let client = new_client(&settings.backend_config()).context("Cannot create backend client")?;
    let resources = ResourceLoader::new(&settings.confdir)
        .load_all(client.clone(), &settings.sync_options())
        .with_context(|| format!("Cannot load template resources from {:?}", settings.confdir))?;

    let driver = ResourceDriver::new(resources, client, settings.mode())?;
    let report = driver.run_with_fallback(stop, settings.interval).await;

    for resource in &report.resources {
        info!(
            resource = %resource.name,
            cycles = resource.cycles,
            updated = resource.updated,
            failures = resource.failures,
            "Resource finished"
        );
    }
    Ok(report)
}
