//! Validate command - load configuration without syncing.

use anyhow::{Context, Result};
use clap::Args;

use confsync_backends::new_client;
use confsync_core::ResourceLoader;

use super::SettingsArgs;
use crate::settings::Settings;

#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

pub async fn execute(settings: &Settings) -> Result<()> {
    println!("🔍 Validating {:?}", settings.confdir);

    let client = new_client(&settings.backend_config()).context("Cannot create backend client")?;
    let resources = ResourceLoader::new(&settings.confdir)
        .load_all(client, &settings.sync_options())
        .with_context(|| format!("Cannot load template resources from {:?}", settings.confdir))?;

    for resource in &resources {
        println!(
            "   ✅ {} -> {:?} (keys: {})",
            resource.name(),
            resource.dest(),
            resource.keys().join(", ")
        );
    }
    println!("{} template resource(s) valid", resources.len());
    Ok(())
}
