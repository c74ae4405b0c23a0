//! Keys read from process environment variables.
//!
//! A key maps to a variable by dropping the leading slash, replacing `/`
//! with `_` and upper-casing: `/foo/bar` is `FOO_BAR`. The mapping back
//! lower-cases and turns every `_` into `/`.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use confsync_core::mirror::clean_path;
use confsync_core::{StoreClient, StoreResult};

/// Client over the current process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvClient;

impl EnvClient {
    pub fn new() -> Self {
        Self
    }
}

/// Environment variable name for a key.
pub fn key_to_env(key: &str) -> String {
    key.trim_start_matches('/').replace('/', "_").to_uppercase()
}

/// Key for an environment variable name.
pub fn env_to_key(name: &str) -> String {
    clean_path(&name.to_lowercase().replace('_', "/"))
}

#[async_trait]
impl StoreClient for EnvClient {
    async fn get_values(&self, keys: &[String]) -> StoreResult<HashMap<String, String>> {
        let prefixes: Vec<String> = keys.iter().map(|k| key_to_env(k)).collect();
        Ok(std::env::vars_os()
            .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
            .filter(|(name, _)| prefixes.iter().any(|p| name.starts_with(p.as_str())))
            .map(|(name, value)| (env_to_key(&name), value))
            .collect())
    }

    async fn watch_prefix(
        &self,
        _prefix: &str,
        _keys: &[String],
        _wait_index: u64,
        stop: &CancellationToken,
    ) -> StoreResult<u64> {
        stop.cancelled().await;
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "env"
    }
}
