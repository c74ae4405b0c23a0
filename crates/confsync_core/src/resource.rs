//! Template resource: render, stage, diff, commit, check and reload.
//!
//! One [`TemplateResource`] exists per configured template for the lifetime
//! of the process. Each call to [`TemplateResource::process`] runs one full
//! cycle:
//!
//! 1. fetch every key under the resource's prefixes into a fresh mirror
//! 2. render the template against that mirror
//! 3. compare the render with the destination file
//! 4. on a difference, stage a temporary file beside the destination, run the
//!    check command on it, rename it into place and run the reload command
//!
//! A failure before step 4 renames anything leaves the destination untouched.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use minijinja::{context, AutoEscape, Environment};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::command::{self, CommandFailure};
use crate::config::{ResourceConfig, SyncOptions};
use crate::error::{ConfigResult, StoreResult, SyncError, SyncResult};
use crate::funcs::FunctionLibrary;
use crate::mirror::{KvMirror, SharedMirror};
use crate::stage::{self, FileAttrs, StagedFile, StagedOutput};
use crate::store::StoreClient;

/// Phase of the current (or last) cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    FetchingVars,
    Rendering,
    Staged,
    Unchanged,
    Committing,
    CheckFailed,
    ReloadFailed,
    Settled,
}

/// Result of a cycle that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Destination already matched the render
    Unchanged,
    /// Destination was replaced
    Updated,
    /// Destination differs but noop mode skipped the write
    WouldUpdate,
}

/// A parsed template resource bound to a backend client.
pub struct TemplateResource {
    name: String,
    config: ResourceConfig,
    template: String,
    prefix: String,
    keys: Vec<String>,
    mode: Option<u32>,
    options: SyncOptions,
    client: Arc<dyn StoreClient>,
    mirror: SharedMirror,
    staged: Option<StagedOutput>,
    cursor: u64,
    state: CycleState,
    last_state: CycleState,
}

impl std::fmt::Debug for TemplateResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateResource")
            .field("name", &self.name)
            .field("dest", &self.config.dest)
            .field("prefix", &self.prefix)
            .field("keys", &self.keys)
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .finish()
    }
}

impl TemplateResource {
    /// Bind `config` and its template text to `client`.
    pub fn new(
        name: impl Into<String>,
        config: ResourceConfig,
        template: impl Into<String>,
        client: Arc<dyn StoreClient>,
        options: &SyncOptions,
    ) -> ConfigResult<Self> {
        let name = name.into();
        config.validate(&name)?;
        let mode = config.file_mode(&name)?;
        let prefix = config.effective_prefix(&options.prefix);
        let keys = config.prefixed_keys(&options.prefix);

        Ok(Self {
            name,
            config,
            template: template.into(),
            prefix,
            keys,
            mode,
            options: options.clone(),
            client,
            mirror: KvMirror::shared(),
            staged: None,
            cursor: 0,
            state: CycleState::Idle,
            last_state: CycleState::Idle,
        })
    }

    /// Build a resource from resource TOML and template text held in memory.
    pub fn from_toml(
        toml_text: &str,
        template: impl Into<String>,
        client: Arc<dyn StoreClient>,
        options: &SyncOptions,
    ) -> ConfigResult<Self> {
        let config = ResourceConfig::from_toml_str(toml_text, "inline")?;
        let name = config.src.clone();
        Self::new(name, config, template, client, options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn dest(&self) -> &Path {
        &self.config.dest
    }

    /// Effective key prefix, stripped from keys stored in the mirror.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full backend keys queried each cycle.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Last backend index observed by a watch.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: u64) {
        self.cursor = cursor;
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Phase reached by the previous cycle before returning to idle.
    pub fn last_state(&self) -> CycleState {
        self.last_state
    }

    pub fn staged(&self) -> Option<&StagedOutput> {
        self.staged.as_ref()
    }

    pub fn mirror(&self) -> &SharedMirror {
        &self.mirror
    }

    /// Run one full cycle and return to idle.
    pub async fn process(&mut self, stop: &CancellationToken) -> SyncResult<CycleOutcome> {
        let span = info_span!("resource", name = %self.name);
        let result = self.run_cycle(stop).instrument(span).await;
        self.last_state = self.state;
        self.state = CycleState::Idle;
        result
    }

    async fn run_cycle(&mut self, stop: &CancellationToken) -> SyncResult<CycleOutcome> {
        self.fetch_vars(stop).await?;
        self.render()?;
        self.diff_and_commit(stop).await
    }

    /// Replace the mirror with the backend's current values.
    pub async fn fetch_vars(&mut self, stop: &CancellationToken) -> SyncResult<()> {
        self.state = CycleState::FetchingVars;
        debug!("Retrieving keys from store: {:?}", self.keys);

        let values = tokio::select! {
            biased;
            _ = stop.cancelled() => return Err(SyncError::Cancelled),
            result = self.client.get_values(&self.keys) => result?,
        };
        self.populate_mirror(values);
        Ok(())
    }

    fn populate_mirror(&self, values: HashMap<String, String>) {
        let mut mirror = self.mirror.write();
        mirror.purge();
        for (key, value) in values {
            if !self.keys.iter().any(|k| key.starts_with(k.as_str())) {
                continue;
            }
            let relative = key.strip_prefix(self.prefix.as_str()).unwrap_or(&key);
            mirror.set(relative, value);
        }
        debug!("Mirror holds {} keys", mirror.len());
    }

    /// Render the template against the current mirror.
    pub fn render(&mut self) -> SyncResult<&StagedOutput> {
        self.state = CycleState::Rendering;
        self.staged = None;

        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        FunctionLibrary::new(self.mirror.clone()).install(&mut env);

        let rendered = env
            .render_named_str(&self.config.src, &self.template, context! {})
            .map_err(|source| SyncError::Render {
                template: self.config.src.clone(),
                source,
            })?;

        self.state = CycleState::Staged;
        Ok(self.staged.insert(StagedOutput::new(rendered)))
    }

    /// Compare the staged output with the destination and commit on change.
    pub async fn diff_and_commit(&mut self, stop: &CancellationToken) -> SyncResult<CycleOutcome> {
        if self.staged.is_none() {
            self.render()?;
        }
        let staged = self.staged.clone().unwrap_or_default();
        let dest = self.config.dest.clone();
        let attrs = FileAttrs::resolve(&dest, self.mode, self.config.uid, self.config.gid);

        let changed = stage::needs_update(&dest, staged.as_bytes(), &attrs)
            .map_err(|e| SyncError::commit(&dest, e))?;
        if !changed {
            debug!("Target config {:?} in sync", dest);
            self.state = CycleState::Unchanged;
            return Ok(CycleOutcome::Unchanged);
        }
        if self.options.noop {
            info!("Noop mode enabled, {:?} will not be modified", dest);
            self.state = CycleState::Unchanged;
            return Ok(CycleOutcome::WouldUpdate);
        }

        self.state = CycleState::Committing;
        let file = StagedFile::create(&dest, staged.as_bytes(), &attrs)
            .map_err(|e| SyncError::commit(&dest, e))?;

        if !self.options.sync_only {
            if let Err(e) = self.check(file.path(), stop).await {
                self.state = CycleState::CheckFailed;
                return Err(e);
            }
        }

        file.commit().map_err(|e| SyncError::commit(&dest, e))?;
        info!("Target config {:?} has been updated", dest);

        if !self.options.sync_only {
            if let Err(e) = self.reload(stop).await {
                self.state = CycleState::ReloadFailed;
                return Err(e);
            }
        }

        self.state = CycleState::Settled;
        Ok(CycleOutcome::Updated)
    }

    /// Run the check command against a staged file, if one is configured.
    pub async fn check(&self, staged_path: &Path, stop: &CancellationToken) -> SyncResult<()> {
        let Some(template) = &self.config.check_cmd else {
            return Ok(());
        };
        let command = render_check_command(template, staged_path)?;

        let output = command::run_shell(&command, stop)
            .await
            .map_err(|failure| command_failure(failure, &command, true))?;
        if !output.success() {
            return Err(SyncError::CheckFailed {
                command,
                status: output.status,
                output: output.combined_output(),
            });
        }
        debug!("Check command {:?} passed in {}ms", command, output.duration_ms);
        Ok(())
    }

    /// Run the reload command, if one is configured.
    pub async fn reload(&self, stop: &CancellationToken) -> SyncResult<()> {
        let Some(command) = &self.config.reload_cmd else {
            return Ok(());
        };

        let output = command::run_shell(command, stop)
            .await
            .map_err(|failure| command_failure(failure, command, false))?;
        if !output.success() {
            return Err(SyncError::ReloadFailed {
                command: command.clone(),
                status: output.status,
                output: output.combined_output(),
            });
        }
        info!("Reload command {:?} succeeded", command);
        Ok(())
    }

    /// Long-poll the backend for a change after the current cursor.
    pub async fn wait_for_change(&self, stop: &CancellationToken) -> StoreResult<u64> {
        self.client
            .watch_prefix(&self.prefix, &self.keys, self.cursor, stop)
            .await
    }
}

fn render_check_command(template: &str, staged_path: &Path) -> SyncResult<String> {
    let env = Environment::new();
    env.render_str(template, context! { src => staged_path.display().to_string() })
        .map_err(|source| SyncError::Render {
            template: "check_cmd".to_string(),
            source,
        })
}

fn command_failure(failure: CommandFailure, command: &str, is_check: bool) -> SyncError {
    match failure {
        CommandFailure::Cancelled => SyncError::Cancelled,
        CommandFailure::Spawn(e) if is_check => SyncError::CheckFailed {
            command: command.to_string(),
            status: None,
            output: e.to_string(),
        },
        CommandFailure::Spawn(e) => SyncError::ReloadFailed {
            command: command.to_string(),
            status: None,
            output: e.to_string(),
        },
    }
}
