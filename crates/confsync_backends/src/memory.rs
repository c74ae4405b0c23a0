//! In-process key/value store.
//!
//! Values can be changed while resources run, and every change wakes pending
//! watches. Failures can be scripted for error-path testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use confsync_core::mirror::clean_path;
use confsync_core::{StoreClient, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Entries {
    values: BTreeMap<String, String>,
    /// Index of the last write or delete of each key
    modified: BTreeMap<String, u64>,
}

/// Shared in-memory backend. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryClient {
    entries: Arc<RwLock<Entries>>,
    index: Arc<AtomicU64>,
    changed: Arc<Notify>,
    /// Persistent failure returned by every call while set
    simulate_failure: Arc<RwLock<Option<String>>>,
    /// Number of upcoming `get_values` calls that fail
    failing_gets: Arc<AtomicUsize>,
    get_calls: Arc<AtomicUsize>,
    watch_calls: Arc<AtomicUsize>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed initial values.
    pub fn with_values<K, V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        for (k, v) in pairs {
            self.set(k.as_ref(), v);
        }
        self
    }

    /// Make every call fail with `message` until cleared with `None`.
    pub fn simulate_failure(&self, message: Option<String>) {
        *self.simulate_failure.write() = message;
    }

    /// Make the next `count` value queries fail.
    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        let key = clean_path(key);
        let index = self.bump();
        let mut entries = self.entries.write();
        entries.values.insert(key.clone(), value.into());
        entries.modified.insert(key, index);
        drop(entries);
        self.changed.notify_waiters();
    }

    pub fn delete(&self, key: &str) {
        let key = clean_path(key);
        let mut entries = self.entries.write();
        if entries.values.remove(&key).is_none() {
            return;
        }
        let index = self.bump();
        entries.modified.insert(key, index);
        drop(entries);
        self.changed.notify_waiters();
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().values.get(&clean_path(key)).cloned()
    }

    /// Current change index.
    pub fn index(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }

    /// Number of `get_values` calls served so far, failed ones included.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `watch_prefix` calls started so far.
    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    fn bump(&self) -> u64 {
        self.index.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest index at which any key matching `keys` changed.
    fn last_change(&self, keys: &[String]) -> u64 {
        let entries = self.entries.read();
        entries
            .modified
            .iter()
            .filter(|(k, _)| keys.iter().any(|p| k.starts_with(p.as_str())))
            .map(|(_, index)| *index)
            .max()
            .unwrap_or(0)
    }

    fn check_failure(&self) -> Option<String> {
        self.simulate_failure.read().clone()
    }
}

#[async_trait]
impl StoreClient for MemoryClient {
    async fn get_values(&self, keys: &[String]) -> StoreResult<HashMap<String, String>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.check_failure() {
            return Err(StoreError::Unavailable(message));
        }
        let scripted = self
            .failing_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted {
            return Err(StoreError::Unavailable("scripted failure".to_string()));
        }

        let entries = self.entries.read();
        Ok(entries
            .values
            .iter()
            .filter(|(k, _)| keys.iter().any(|p| k.starts_with(p.as_str())))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
        wait_index: u64,
        stop: &CancellationToken,
    ) -> StoreResult<u64> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        loop {
            if let Some(message) = self.check_failure() {
                return Err(StoreError::Watch {
                    prefix: prefix.to_string(),
                    message,
                });
            }
            let notified = self.changed.notified();
            if self.last_change(keys) > wait_index {
                let index = self.index();
                debug!("Memory watch on {} fired at index {}", prefix, index);
                return Ok(index);
            }
            tokio::select! {
                _ = stop.cancelled() => return Ok(0),
                _ = notified => {}
            }
        }
    }

    fn supports_watch(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
