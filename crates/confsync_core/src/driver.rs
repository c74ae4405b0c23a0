//! Drives repeated cycles for every template resource.
//!
//! Each resource gets its own task. Cycles of one resource run strictly one
//! after another; different resources never wait on each other. A single
//! [`CancellationToken`] stops every loop, any in-flight backend call and any
//! running check or reload command.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::{ConfigError, ErrorKind, SyncError, SyncResult};
use crate::resource::{CycleOutcome, TemplateResource};
use crate::store::StoreClient;

/// How cycles are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// One cycle per resource, then return
    Once,
    /// A cycle, then sleep for the interval, until stopped
    Interval(Duration),
    /// A cycle after every change reported by the backend
    Watch,
}

/// Per-resource counters collected by the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceReport {
    pub name: String,
    pub cycles: u64,
    pub updated: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
}

impl ResourceReport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn record(&mut self, result: &SyncResult<CycleOutcome>) {
        match result {
            Err(SyncError::Cancelled) => {}
            Ok(outcome) => {
                self.cycles += 1;
                if *outcome == CycleOutcome::Updated {
                    self.updated += 1;
                }
            }
            Err(e) => {
                self.cycles += 1;
                self.failures += 1;
                if e.is_post_commit() {
                    self.updated += 1;
                }
                self.last_error = Some(e.to_string());
                self.last_error_kind = Some(e.kind());
            }
        }
    }
}

/// Summary of a driver run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub resources: Vec<ResourceReport>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.resources.iter().all(|r| r.failures == 0)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ResourceReport> {
        self.resources.iter().filter(|r| r.failures > 0)
    }

    pub fn get(&self, name: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.name == name)
    }
}

/// Schedules cycles for a set of resources.
pub struct ResourceDriver {
    resources: Vec<TemplateResource>,
    client: Arc<dyn StoreClient>,
    mode: SyncMode,
    backoff: BackoffPolicy,
}

impl ResourceDriver {
    /// Fails when `resources` is empty.
    pub fn new(
        resources: Vec<TemplateResource>,
        client: Arc<dyn StoreClient>,
        mode: SyncMode,
    ) -> SyncResult<Self> {
        if resources.is_empty() {
            return Err(ConfigError::EmptyResourceSet.into());
        }
        Ok(Self {
            resources,
            client,
            mode,
            backoff: BackoffPolicy::default(),
        })
    }

    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Mode that will actually run, given the backend's capabilities.
    pub fn effective_mode(&self, fallback_interval: Duration) -> SyncMode {
        match self.mode {
            SyncMode::Watch if !self.client.supports_watch() => {
                SyncMode::Interval(fallback_interval)
            }
            mode => mode,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Run until every loop finishes: after one cycle each in
    /// [`SyncMode::Once`], otherwise until `stop` fires.
    pub async fn run(self, stop: CancellationToken) -> SyncReport {
        self.run_with_fallback(stop, Duration::from_secs(600)).await
    }

    /// Like [`run`](Self::run), polling every `fallback_interval` when watch
    /// mode is requested but the backend cannot watch.
    pub async fn run_with_fallback(
        self,
        stop: CancellationToken,
        fallback_interval: Duration,
    ) -> SyncReport {
        let mode = self.effective_mode(fallback_interval);
        if mode != self.mode {
            warn!(
                "Backend {} does not support watch, polling every {:?}",
                self.client.name(),
                fallback_interval
            );
        }
        info!(
            "Starting {} resource(s) in {:?} mode",
            self.resources.len(),
            mode
        );

        let mut tasks = JoinSet::new();
        let mut names = Vec::with_capacity(self.resources.len());
        for resource in self.resources {
            names.push(resource.name().to_string());
            let stop = stop.clone();
            let backoff = self.backoff.clone();
            tasks.spawn(async move {
                match mode {
                    SyncMode::Once => once(resource, &stop).await,
                    SyncMode::Interval(interval) => interval_loop(resource, interval, &stop).await,
                    SyncMode::Watch => watch_loop(resource, backoff, &stop).await,
                }
            });
        }

        let mut reports = Vec::with_capacity(names.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("Resource task aborted: {}", e),
            }
        }

        // Keep configuration order and surface tasks that died.
        let resources = names
            .into_iter()
            .map(|name| {
                match reports.iter().position(|r| r.name == name) {
                    Some(idx) => reports.swap_remove(idx),
                    None => ResourceReport {
                        failures: 1,
                        last_error: Some("resource task panicked".to_string()),
                        ..ResourceReport::new(name)
                    },
                }
            })
            .collect();
        SyncReport { resources }
    }
}

async fn once(mut resource: TemplateResource, stop: &CancellationToken) -> ResourceReport {
    let mut report = ResourceReport::new(resource.name());
    cycle(&mut resource, stop, &mut report).await;
    report
}

async fn interval_loop(
    mut resource: TemplateResource,
    interval: Duration,
    stop: &CancellationToken,
) -> ResourceReport {
    let mut report = ResourceReport::new(resource.name());
    loop {
        cycle(&mut resource, stop, &mut report).await;
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    debug!("Interval loop for {} stopped", resource.name());
    report
}

async fn watch_loop(
    mut resource: TemplateResource,
    policy: BackoffPolicy,
    stop: &CancellationToken,
) -> ResourceReport {
    let mut report = ResourceReport::new(resource.name());
    let mut backoff = Backoff::new(policy);
    let mut pending = true;

    while !stop.is_cancelled() {
        if pending {
            let result = cycle(&mut resource, stop, &mut report).await;
            pending = matches!(result, Some(ErrorKind::Backend));
            if pending {
                if !pause(backoff.next_delay(), stop).await {
                    break;
                }
                continue;
            }
            backoff.reset();
        }

        let watched = tokio::select! {
            _ = stop.cancelled() => break,
            result = resource.wait_for_change(stop) => result,
        };
        match watched {
            Ok(_) if stop.is_cancelled() => break,
            Ok(index) => {
                debug!("Change observed under {} at index {}", resource.prefix(), index);
                resource.set_cursor(index);
                backoff.reset();
                pending = true;
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    "Watch on {} failed: {}; retrying in {:?}",
                    resource.prefix(),
                    e,
                    delay
                );
                if !pause(delay, stop).await {
                    break;
                }
            }
        }
    }
    debug!("Watch loop for {} stopped", resource.name());
    report
}

/// Sleep unless stopped first. Returns `false` when stopped.
async fn pause(delay: Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Run one cycle and log it. Returns the failure kind, if any.
async fn cycle(
    resource: &mut TemplateResource,
    stop: &CancellationToken,
    report: &mut ResourceReport,
) -> Option<ErrorKind> {
    let result = resource.process(stop).await;
    report.record(&result);

    match &result {
        Ok(CycleOutcome::Updated) => {
            info!(resource = resource.name(), "Destination {:?} updated", resource.dest())
        }
        Ok(CycleOutcome::WouldUpdate) => {
            info!(resource = resource.name(), "Destination {:?} out of sync", resource.dest())
        }
        Ok(CycleOutcome::Unchanged) => {
            debug!(resource = resource.name(), "Destination {:?} unchanged", resource.dest())
        }
        Err(SyncError::Cancelled) => debug!(resource = resource.name(), "Cycle cancelled"),
        Err(e @ SyncError::Backend(_)) => warn!(resource = resource.name(), "{}", e),
        Err(e @ SyncError::CheckFailed { .. }) => error!(
            resource = resource.name(),
            dest = ?resource.dest(),
            "Candidate config rejected: {}",
            e
        ),
        Err(e @ SyncError::ReloadFailed { .. }) => error!(
            resource = resource.name(),
            dest = ?resource.dest(),
            alert = true,
            "Config committed but reload failed: {}",
            e
        ),
        Err(e) => error!(resource = resource.name(), "{}", e),
    }
    result.err().map(|e| e.kind())
}

/// Run one cycle for every resource concurrently and report.
pub async fn sync_once(
    resources: Vec<TemplateResource>,
    client: Arc<dyn StoreClient>,
    stop: CancellationToken,
) -> SyncResult<SyncReport> {
    let driver = ResourceDriver::new(resources, client, SyncMode::Once)?;
    Ok(driver.run(stop).await)
}
