//! Template resource configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::mirror::join_path;

/// Mode given to new destination files when none is configured.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceFile {
    template: ResourceConfig,
}

/// One `[template]` table: a template bound to a destination and key list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    /// Template source, relative to the templates directory
    pub src: String,
    /// Destination file
    pub dest: PathBuf,
    /// Key prefixes to fetch, relative to the resource prefix
    #[serde(default)]
    pub keys: Vec<String>,
    /// Prefix prepended to every key, after the global prefix
    #[serde(default)]
    pub prefix: Option<String>,
    /// Octal file mode, e.g. "0644"
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    /// Validation command; `{{ src }}` expands to the staged file path
    #[serde(default)]
    pub check_cmd: Option<String>,
    #[serde(default)]
    pub reload_cmd: Option<String>,
}

impl ResourceConfig {
    pub fn new(src: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            keys: Vec::new(),
            prefix: None,
            mode: None,
            uid: None,
            gid: None,
            check_cmd: None,
            reload_cmd: None,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    pub fn check_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.check_cmd = Some(cmd.into());
        self
    }

    pub fn reload_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.reload_cmd = Some(cmd.into());
        self
    }

    /// Parse the TOML text of a resource file.
    pub fn from_toml_str(text: &str, origin: &str) -> ConfigResult<Self> {
        let file: ResourceFile = toml::from_str(text).map_err(|e| ConfigError::Parse {
            origin: origin.to_string(),
            message: e.to_string(),
        })?;
        file.template.validate(origin)?;
        Ok(file.template)
    }

    /// Read and parse a resource file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    pub fn validate(&self, origin: &str) -> ConfigResult<()> {
        if self.src.trim().is_empty() {
            return Err(ConfigError::EmptySrc(origin.to_string()));
        }
        if self.dest.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDest(origin.to_string()));
        }
        self.file_mode(origin)?;
        Ok(())
    }

    /// Configured mode, parsed from octal.
    pub fn file_mode(&self, origin: &str) -> ConfigResult<Option<u32>> {
        let Some(mode) = &self.mode else {
            return Ok(None);
        };
        let digits = mode.trim();
        let digits = digits.strip_prefix("0o").unwrap_or(digits);
        u32::from_str_radix(digits, 8)
            .ok()
            .filter(|m| *m <= 0o7777)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidMode {
                origin: origin.to_string(),
                mode: mode.clone(),
            })
    }

    /// Effective prefix: the global prefix joined with the resource prefix.
    pub fn effective_prefix(&self, global_prefix: &str) -> String {
        let global = join_path("/", global_prefix);
        join_path(&global, self.prefix.as_deref().unwrap_or_default())
    }

    /// Full backend keys: every configured key under the effective prefix.
    pub fn prefixed_keys(&self, global_prefix: &str) -> Vec<String> {
        let prefix = self.effective_prefix(global_prefix);
        self.keys.iter().map(|k| join_path(&prefix, k)).collect()
    }
}

/// Process-wide knobs shared by every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Global key prefix
    pub prefix: String,
    /// Render and diff only; never write or run commands
    pub noop: bool,
    /// Commit without running check or reload commands
    pub sync_only: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            prefix: "/".to_string(),
            noop: false,
            sync_only: false,
        }
    }
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn noop(mut self, enabled: bool) -> Self {
        self.noop = enabled;
        self
    }

    pub fn sync_only(mut self, enabled: bool) -> Self {
        self.sync_only = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[template]
src = "test.conf.tmpl"
dest = "/tmp/test.conf"
keys = ["/test/key", "nested/"]
prefix = "app"
mode = "0640"
check_cmd = "cat {{ src }}"
reload_cmd = "true"
"#;

    #[test]
    fn test_parse_resource() {
        let config = ResourceConfig::from_toml_str(SAMPLE, "sample").unwrap();
        assert_eq!(config.src, "test.conf.tmpl");
        assert_eq!(config.dest, PathBuf::from("/tmp/test.conf"));
        assert_eq!(config.file_mode("sample").unwrap(), Some(0o640));
        assert_eq!(config.check_cmd.as_deref(), Some("cat {{ src }}"));
    }

    #[test]
    fn test_prefixed_keys() {
        let config = ResourceConfig::from_toml_str(SAMPLE, "sample").unwrap();
        assert_eq!(config.effective_prefix("/"), "/app");
        assert_eq!(config.effective_prefix("/global/"), "/global/app");
        assert_eq!(
            config.prefixed_keys("/"),
            vec!["/app/test/key".to_string(), "/app/nested".to_string()]
        );
        let bare = ResourceConfig::new("a", "b").key("/x");
        assert_eq!(bare.effective_prefix("/"), "/");
        assert_eq!(bare.prefixed_keys(""), vec!["/x".to_string()]);
    }

    #[test]
    fn test_empty_src_rejected() {
        let text = "[template]\nsrc = \"\"\ndest = \"/tmp/x\"\n";
        assert!(matches!(
            ResourceConfig::from_toml_str(text, "empty"),
            Err(ConfigError::EmptySrc(_))
        ));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let text = "[template]\nsrc = \"a\"\ndest = \"/tmp/x\"\nmode = \"0999\"\n";
        assert!(matches!(
            ResourceConfig::from_toml_str(text, "mode"),
            Err(ConfigError::InvalidMode { .. })
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let text = "[template]\nsrc = \"a\"\ndest = \"/tmp/x\"\nbogus = 1\n";
        assert!(matches!(
            ResourceConfig::from_toml_str(text, "bogus"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
