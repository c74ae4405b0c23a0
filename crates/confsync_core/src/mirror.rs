//! In-process key/value mirror.
//!
//! A [`KvMirror`] holds the keys fetched for one template resource during one
//! render cycle. Keys are normalized absolute paths and are kept sorted, so
//! listing and glob queries come back in key order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::MirrorError;

/// Mirror shared between a resource and the helper functions of its template.
pub type SharedMirror = Arc<RwLock<KvMirror>>;

/// A key and its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Snapshot of backend keys for one render cycle.
#[derive(Debug, Clone, Default)]
pub struct KvMirror {
    entries: BTreeMap<String, String>,
}

impl KvMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a new, empty mirror for sharing with a function library.
    pub fn shared() -> SharedMirror {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries.insert(clean_path(key), value.into());
    }

    /// Exact lookup. Directory prefixes without a stored value are not found.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(&clean_path(key)).map(String::as_str)
    }

    pub fn get_pair(&self, key: &str) -> Option<KvPair> {
        let key = clean_path(key);
        self.entries
            .get(&key)
            .map(|value| KvPair::new(key.clone(), value.clone()))
    }

    /// All pairs whose key matches a glob pattern, in key order.
    ///
    /// `*` also matches `/`, so a trailing `*` selects every descendant of
    /// the prefix before it.
    pub fn get_all(&self, pattern: &str) -> Result<Vec<KvPair>, MirrorError> {
        let cleaned = clean_path(pattern);
        let matcher = Pattern::new(&cleaned).map_err(|e| MirrorError::BadPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };

        Ok(self
            .entries
            .iter()
            .filter(|(key, _)| matcher.matches_with(key, options))
            .map(|(key, value)| KvPair::new(key.clone(), value.clone()))
            .collect())
    }

    /// Distinct immediate child names below `dir`, leaves and directories.
    pub fn list(&self, dir: &str) -> Vec<String> {
        self.children(dir, false)
    }

    /// Distinct immediate child names below `dir` that have descendants.
    pub fn list_dir(&self, dir: &str) -> Vec<String> {
        self.children(dir, true)
    }

    fn children(&self, dir: &str, dirs_only: bool) -> Vec<String> {
        let dir = clean_path(dir);
        let prefix = if dir == "/" { dir } else { format!("{}/", dir) };

        let mut names = BTreeSet::new();
        for key in self
            .entries
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
        {
            let rest = &key[prefix.len()..];
            let (child, deeper) = match rest.split_once('/') {
                Some((child, _)) => (child, true),
                None => (rest, false),
            };
            if child.is_empty() || (dirs_only && !deeper) {
                continue;
            }
            names.insert(child.to_string());
        }
        names.into_iter().collect()
    }

    /// Drop every key.
    pub fn purge(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stored keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Lexically clean a slash-separated path.
///
/// Repeated separators and `.` segments are dropped and `..` removes the
/// preceding segment. An empty input cleans to `.`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            s => segments.push(s),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Normalize a key to a clean absolute path.
pub fn clean_path(key: &str) -> String {
    clean(&format!("/{}", key))
}

/// Join path segments and clean the result.
pub fn join_path(base: &str, rest: &str) -> String {
    if base.is_empty() {
        return clean(rest);
    }
    clean(&format!("{}/{}", base, rest))
}
