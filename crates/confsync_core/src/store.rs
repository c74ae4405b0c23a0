//! Backend client contract.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;

/// Key/value backend consumed by template resources.
///
/// Implementations must be safe for concurrent use: every resource driver
/// shares one client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Union of all stored keys starting with any of `keys`, by full key.
    async fn get_values(&self, keys: &[String]) -> StoreResult<HashMap<String, String>>;

    /// Block until a key under `prefix` changes after `wait_index`.
    ///
    /// Returns the new index, or `Ok(0)` when `stop` fires first.
    async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
        wait_index: u64,
        stop: &CancellationToken,
    ) -> StoreResult<u64>;

    /// Whether [`watch_prefix`](Self::watch_prefix) reports real changes.
    fn supports_watch(&self) -> bool {
        false
    }

    /// Short backend name for logs.
    fn name(&self) -> &'static str {
        "unknown"
    }
}
