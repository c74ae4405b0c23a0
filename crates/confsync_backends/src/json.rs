//! Keys read from JSON files.
//!
//! Each file holds one object. An optional `"prefix"` string (default `/`)
//! applies to relative keys; every other top-level field is an array of
//! pairs:
//!
//! ```json
//! {
//!   "prefix": "/myapp",
//!   "server": [
//!     { "key": "heapsize", "value": "152m" },
//!     { "fullkey": "/myapp/modules/frontend/env/LOG_DIR", "value": "/var/log/myapp" }
//!   ]
//! }
//! ```
//!
//! Later files override earlier ones key for key. Pairs with an empty value
//! are skipped.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use confsync_core::mirror::join_path;
use confsync_core::{StoreClient, StoreError, StoreResult};

use crate::error::{BackendError, BackendResult};

/// How often a watch re-reads the files.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Deserialize)]
struct Pair {
    #[serde(default)]
    key: String,
    #[serde(default)]
    fullkey: String,
    #[serde(default)]
    value: String,
}

/// Client over one or more JSON files.
///
/// Every query re-reads the files, so values are never older than the call.
pub struct JsonClient {
    files: Vec<PathBuf>,
    kvs: RwLock<HashMap<String, String>>,
    /// Index at which each key was last added, changed or removed
    modified: RwLock<HashMap<String, u64>>,
    index: AtomicU64,
    poll_interval: Duration,
}

impl JsonClient {
    /// Load `files` in order. Any unreadable or malformed file is an error.
    pub fn new(files: Vec<PathBuf>) -> BackendResult<Self> {
        if files.is_empty() {
            return Err(BackendError::NoNodes("json".to_string()));
        }
        let kvs = load_files(&files)?;
        info!("Loaded {} keys from {} JSON file(s)", kvs.len(), files.len());
        Ok(Self {
            files,
            kvs: RwLock::new(kvs),
            modified: RwLock::new(HashMap::new()),
            index: AtomicU64::new(0),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Change counter, bumped whenever a reload finds different content.
    pub fn index(&self) -> u64 {
        self.index.load(Ordering::SeqCst)
    }

    /// Re-read the files and record which keys changed.
    fn reload(&self) -> BackendResult<()> {
        let fresh = load_files(&self.files)?;
        let mut kvs = self.kvs.write();
        if *kvs == fresh {
            return Ok(());
        }

        let index = self.index.fetch_add(1, Ordering::SeqCst) + 1;
        let mut modified = self.modified.write();
        for (k, v) in fresh.iter() {
            if kvs.get(k) != Some(v) {
                modified.insert(k.clone(), index);
            }
        }
        for k in kvs.keys().filter(|k| !fresh.contains_key(*k)) {
            modified.insert(k.clone(), index);
        }
        *kvs = fresh;
        debug!("JSON files changed, index now {}", index);
        Ok(())
    }

    /// Highest index at which any key matching `keys` changed.
    fn last_change(&self, keys: &[String]) -> u64 {
        self.modified
            .read()
            .iter()
            .filter(|(k, _)| keys.iter().any(|p| k.starts_with(p.as_str())))
            .map(|(_, index)| *index)
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl StoreClient for JsonClient {
    async fn get_values(&self, keys: &[String]) -> StoreResult<HashMap<String, String>> {
        self.reload()?;
        let kvs = self.kvs.read();
        let mut vars = HashMap::new();
        for key in keys {
            for (k, v) in kvs.iter() {
                if k.starts_with(key.as_str()) {
                    vars.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(vars)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        keys: &[String],
        wait_index: u64,
        stop: &CancellationToken,
    ) -> StoreResult<u64> {
        loop {
            if self.last_change(keys) > wait_index {
                return Ok(self.index());
            }
            tokio::select! {
                _ = stop.cancelled() => return Ok(0),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
            self.reload().map_err(|e| StoreError::Watch {
                prefix: prefix.to_string(),
                message: e.to_string(),
            })?;
        }
    }

    fn supports_watch(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

fn load_files(files: &[PathBuf]) -> BackendResult<HashMap<String, String>> {
    let mut kvs = HashMap::new();
    for file in files {
        let text = fs::read_to_string(file).map_err(|source| BackendError::Read {
            path: file.clone(),
            source,
        })?;
        kvs.extend(parse(file, &text)?);
    }
    Ok(kvs)
}

/// Parse one file into full keys and values.
pub fn parse(path: &Path, text: &str) -> BackendResult<HashMap<String, String>> {
    let malformed = |message: String| BackendError::Malformed {
        path: path.to_path_buf(),
        message,
    };

    let object: Map<String, Value> =
        serde_json::from_str(text).map_err(|e| malformed(e.to_string()))?;
    let prefix = match object.get("prefix") {
        None => "/".to_string(),
        Some(Value::String(p)) => join_path("/", p),
        Some(other) => return Err(malformed(format!("prefix must be a string, got {}", other))),
    };
    if prefix == "/" {
        debug!("{:?} has no prefix", path);
    }

    let mut kvs = HashMap::new();
    for (field, pairs) in object.iter().filter(|(k, _)| k.as_str() != "prefix") {
        let Value::Array(pairs) = pairs else {
            return Err(malformed(format!("field {:?} must be an array of pairs", field)));
        };
        for raw in pairs {
            let pair = Pair::deserialize(raw)
                .map_err(|e| malformed(format!("bad pair in {:?}: {}", field, e)))?;
            if pair.value.is_empty() {
                continue;
            }
            let key = if !pair.key.is_empty() {
                join_path(&prefix, &pair.key)
            } else if !pair.fullkey.is_empty() {
                join_path("/", &pair.fullkey)
            } else {
                warn!("Skipping pair without key in {:?} field {:?}", path, field);
                continue;
            };
            kvs.insert(key, pair.value);
        }
    }
    Ok(kvs)
}
