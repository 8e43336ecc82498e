//! Bundle lifecycle manager
//!
//! Owns one [`InstalledBundle`] record per discovered bundle and is the only
//! code that changes a record's [`RunningState`]. All methods are meant to be
//! called from the UI thread; the manager does no internal locking.
//!
//! ## State machine
//!
//! ```text
//! NotStarted --start ok--> Started --stop--> Stopped
//!      |                                        |
//!      +--start err/panic--> Failed <-----------+ (next load retries)
//! ```
//!
//! A disabled bundle is never started. A bundle whose file is queued for
//! deletion is never started, whatever its enabled flag says.

use std::collections::{BTreeSet, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keystone_core::prelude::*;
use keystone_core::storage::resolve_path;
use keystone_core::versioning::{self, GateOutcome};
use keystone_core::{BundleId, BundleRole, RunningState, Unmet, BUILD_NUMBER};

use super::discovery::{DiscoveredBundle, DiscoverySource};
use super::manifest::BundleManifest;
use super::runtime::BundleRuntime;
use crate::config::{keys, SettingsStore};
use crate::deletion::DeletionQueue;
use crate::observers::{Observers, SubscriptionId};

/// One discovered bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBundle {
    pub id: BundleId,
    pub name: String,
    pub role: BundleRole,
    /// The `.bundle` file
    pub path: PathBuf,
    pub manifest: BundleManifest,
    pub(crate) state: RunningState,
    pub(crate) enabled: bool,
}

impl InstalledBundle {
    fn from_discovered(found: DiscoveredBundle, settings: &SettingsStore) -> Self {
        let DiscoveredBundle { path, manifest } = found;
        Self {
            id: manifest.id,
            name: manifest.name.clone(),
            role: manifest.role,
            enabled: settings.get_bool(&keys::bundle_enabled(&manifest.id), true),
            state: RunningState::NotStarted,
            path,
            manifest,
        }
    }

    pub fn state(&self) -> RunningState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEvent {
    PluginsLoaded { started: usize, failed: usize },
    PluginsUnloaded { stopped: usize },
}

/// Result of one load pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub started: Vec<BundleId>,
    pub failed: Vec<BundleId>,
    /// Disabled, excluded or declined by the versioning prompt
    pub skipped: Vec<BundleId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UninstallOutcome {
    /// File deleted and record dropped
    Removed,
    /// File in use; queued for deletion at the next startup
    Deferred,
}

/// Asked whether to activate a bundle whose requirement is unmet
pub type UnmetPrompt = Arc<dyn Fn(&InstalledBundle, &Unmet) -> bool + Send + Sync>;

/// Progress callback: `(index, total, name)`
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize, &str);

pub struct BundleLifecycleManager {
    records: Vec<InstalledBundle>,
    source: DiscoverySource,
    settings: Arc<SettingsStore>,
    deletions: DeletionQueue,
    runtime: Box<dyn BundleRuntime>,
    host_build: u32,
    installed_resources: BTreeSet<String>,
    prompt: UnmetPrompt,
    observers: Observers<BundleEvent>,
}

impl std::fmt::Debug for BundleLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleLifecycleManager")
            .field("records", &self.records.len())
            .field("source", &self.source)
            .field("runtime", &self.runtime)
            .field("host_build", &self.host_build)
            .finish()
    }
}

impl BundleLifecycleManager {
    pub fn new(
        source: DiscoverySource,
        settings: Arc<SettingsStore>,
        deletions: DeletionQueue,
        runtime: Box<dyn BundleRuntime>,
    ) -> Self {
        Self {
            records: Vec::new(),
            source,
            settings,
            deletions,
            runtime,
            host_build: BUILD_NUMBER,
            installed_resources: BTreeSet::new(),
            prompt: Arc::new(|_, _| false),
            observers: Observers::new(),
        }
    }

    pub fn with_host(mut self, build: u32, installed_resources: BTreeSet<String>) -> Self {
        self.host_build = build;
        self.installed_resources = installed_resources;
        self
    }

    pub fn with_unmet_prompt(mut self, prompt: UnmetPrompt) -> Self {
        self.prompt = prompt;
        self
    }

    // ─────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────

    /// Re-run discovery and reconcile records.
    ///
    /// Records of bundles still present keep their running state; records of
    /// vanished bundles are stopped (if running) and dropped. Returns the new
    /// record count.
    pub fn refresh(&mut self) -> usize {
        let found = self.source.discover();
        let present: HashSet<BundleId> = found.iter().map(|b| b.manifest.id).collect();

        let vanished: Vec<usize> = (0..self.records.len())
            .filter(|&i| !present.contains(&self.records[i].id))
            .collect();
        for &idx in &vanished {
            if self.records[idx].state.is_running() {
                self.stop_one(idx);
            }
            info!("Bundle {} is no longer installed", self.records[idx].name);
        }

        let mut previous = std::mem::take(&mut self.records);
        previous.retain(|r| present.contains(&r.id));

        self.records = found
            .into_iter()
            .map(|found| {
                match previous.iter().position(|r| r.id == found.manifest.id) {
                    Some(pos) => {
                        let mut record = previous.swap_remove(pos);
                        record.name = found.manifest.name.clone();
                        record.role = found.manifest.role;
                        record.path = found.path;
                        record.manifest = found.manifest;
                        record
                    }
                    None => InstalledBundle::from_discovered(found, &self.settings),
                }
            })
            .collect();

        debug!("{} bundle record(s) after refresh", self.records.len());
        self.records.len()
    }

    /// Records in discovery order
    pub fn records(&self) -> &[InstalledBundle] {
        &self.records
    }

    pub fn get(&self, id: &BundleId) -> Option<&InstalledBundle> {
        self.records.iter().find(|r| r.id == *id)
    }

    /// Bundles currently `Started`
    pub fn running(&self) -> impl Iterator<Item = &InstalledBundle> {
        self.records.iter().filter(|r| r.state.is_running())
    }

    fn index_of(&self, id: &BundleId) -> Result<usize> {
        self.records
            .iter()
            .position(|r| r.id == *id)
            .ok_or(Error::UnknownBundle { id: *id })
    }

    // ─────────────────────────────────────────────────────────────
    // Loading
    // ─────────────────────────────────────────────────────────────

    /// Start every eligible bundle of a non-plugin role.
    ///
    /// Bundles already running are left alone.
    pub fn load_role(&mut self, role: BundleRole, progress: Option<Progress<'_>>) -> LoadReport {
        let mut report = LoadReport::default();
        if role.is_plugin() {
            warn!("load_role({}) ignored; plugins load through load_plugins", role);
            return report;
        }

        let pending = self.deletions.pending();
        let candidates: Vec<usize> = (0..self.records.len())
            .filter(|&i| self.records[i].role == role && !self.records[i].state.is_running())
            .collect();

        let mut eligible = Vec::new();
        for idx in candidates {
            if self.is_eligible(idx, &pending) {
                eligible.push(idx);
            } else {
                report.skipped.push(self.records[idx].id);
            }
        }

        let total = eligible.len();
        let mut progress = progress;
        for (n, idx) in eligible.into_iter().enumerate() {
            if let Some(cb) = progress.as_mut() {
                cb(n, total, &self.records[idx].name);
            }
            self.activate(idx, &mut report);
        }

        if total > 0 {
            info!(
                "Loaded {} {} bundle(s), {} failed",
                report.started.len(),
                role,
                report.failed.len()
            );
        }
        report
    }

    /// Stop all plugins, then start every eligible plugin bundle.
    ///
    /// One bundle failing never stops the others. `PluginsLoaded` fires once at
    /// the end of every call.
    pub fn load_plugins(&mut self) -> LoadReport {
        self.unload_plugins();

        let pending = self.deletions.pending();
        let mut report = LoadReport::default();

        for idx in 0..self.records.len() {
            let record = &self.records[idx];
            match record.role {
                BundleRole::ActivatedPlugin | BundleRole::InjectedPlugin => {}
                BundleRole::Extension => {
                    if record.enabled
                        && record.state == RunningState::NotStarted
                        && !is_excluded(&record.path, &pending)
                    {
                        warn!(
                            "Extension bundle {} ({}) missed the extension phase; skipping",
                            record.name, record.id
                        );
                    }
                    continue;
                }
                BundleRole::Library | BundleRole::Theme => continue,
            }

            if !self.is_eligible(idx, &pending) {
                report.skipped.push(self.records[idx].id);
                continue;
            }
            self.activate(idx, &mut report);
        }

        info!(
            "Plugins loaded: {} started, {} failed, {} skipped",
            report.started.len(),
            report.failed.len(),
            report.skipped.len()
        );
        self.observers.notify(&BundleEvent::PluginsLoaded {
            started: report.started.len(),
            failed: report.failed.len(),
        });
        report
    }

    /// Stop every running plugin. Does nothing if none is running.
    pub fn unload_plugins(&mut self) -> usize {
        let running: Vec<usize> = (0..self.records.len())
            .filter(|&i| self.records[i].role.is_plugin() && self.records[i].state.is_running())
            .collect();
        if running.is_empty() {
            return 0;
        }

        for &idx in &running {
            self.stop_one(idx);
        }
        info!("Unloaded {} plugin(s)", running.len());
        self.observers.notify(&BundleEvent::PluginsUnloaded {
            stopped: running.len(),
        });
        running.len()
    }

    /// Stop every running bundle, plugins first, then other roles in reverse
    /// load order.
    pub fn stop_all(&mut self) {
        self.unload_plugins();
        for idx in (0..self.records.len()).rev() {
            if self.records[idx].state.is_running() {
                self.stop_one(idx);
            }
        }
    }

    fn is_eligible(&self, idx: usize, pending: &HashSet<PathBuf>) -> bool {
        let record = &self.records[idx];
        if !record.enabled {
            debug!("Skipping disabled bundle {}", record.name);
            return false;
        }
        if is_excluded(&record.path, pending) {
            debug!("Skipping bundle {} pending deletion", record.name);
            return false;
        }
        match versioning::check(
            &record.manifest.requirement(),
            self.host_build,
            &self.installed_resources,
        ) {
            GateOutcome::Satisfied => true,
            GateOutcome::Unsatisfied(unmet) => {
                if (self.prompt)(record, &unmet) {
                    info!("Activating {} despite unmet requirement: {}", record.name, unmet);
                    true
                } else {
                    info!("Not activating {}: {}", record.name, unmet);
                    false
                }
            }
        }
    }

    fn activate(&mut self, idx: usize, report: &mut LoadReport) {
        let id = self.records[idx].id;
        if !self.start_one(idx) {
            report.failed.push(id);
            return;
        }
        report.started.push(id);

        if self.records[idx].role == BundleRole::InjectedPlugin {
            let record = &self.records[idx];
            let runtime = &mut self.runtime;
            if let Err(e) = guarded(&record.name, || runtime.show(record)) {
                warn!("Failed to show {} ({}): {}", record.name, record.id, e);
            }
        }
    }

    fn start_one(&mut self, idx: usize) -> bool {
        let record = &self.records[idx];
        let runtime = &mut self.runtime;
        let result = guarded(&record.name, || runtime.start(record));
        match result {
            Ok(()) => {
                debug!("Started bundle {}", record.name);
                self.records[idx].state = RunningState::Started;
                true
            }
            Err(e) => {
                warn!("Bundle {} ({}) failed to start: {}", record.name, record.id, e);
                self.records[idx].state = RunningState::Failed;
                false
            }
        }
    }

    fn stop_one(&mut self, idx: usize) {
        let record = &self.records[idx];
        let runtime = &mut self.runtime;
        if let Err(e) = guarded(&record.name, || runtime.stop(record)) {
            warn!("Bundle {} ({}) failed to stop: {}", record.name, record.id, e);
        }
        self.records[idx].state = RunningState::Stopped;
    }

    // ─────────────────────────────────────────────────────────────
    // Enable / disable / uninstall
    // ─────────────────────────────────────────────────────────────

    /// Persist the enabled flag. Starts and stops nothing.
    pub fn set_enabled(&mut self, id: &BundleId, enabled: bool) -> Result<()> {
        let idx = self.index_of(id)?;
        self.records[idx].enabled = enabled;
        self.settings.set_bool(keys::bundle_enabled(id), enabled);
        self.settings.save()
    }

    pub fn is_enabled(&self, id: &BundleId) -> Option<bool> {
        self.get(id).map(|r| r.enabled)
    }

    /// Stop the bundle and delete its file, or queue the file for deletion at
    /// the next startup when it can't be removed now.
    pub fn uninstall(&mut self, id: &BundleId) -> Result<UninstallOutcome> {
        let idx = self.index_of(id)?;
        if self.records[idx].state.is_running() {
            self.stop_one(idx);
        }

        let path = self.records[idx].path.clone();
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Could not delete {} now ({}); deferring", path.display(), e);
                self.deletions.mark(&path, true)?;
                return Ok(UninstallOutcome::Deferred);
            }
        }

        let record = self.records.remove(idx);
        self.settings.remove(&keys::bundle_enabled(&record.id));
        self.settings.save()?;
        info!("Uninstalled bundle {}", record.name);
        Ok(UninstallOutcome::Removed)
    }

    // ─────────────────────────────────────────────────────────────
    // Misc
    // ─────────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&BundleEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Run a `--run` script through the bundle runtime
    pub fn run_script(&mut self, script: &Path) -> Result<i32> {
        self.runtime.run_script(script)
    }
}

/// A bundle file is excluded when it, or a directory containing it, is queued
/// for deletion. `pending` holds resolved paths.
fn is_excluded(path: &Path, pending: &HashSet<PathBuf>) -> bool {
    let path = resolve_path(path);
    pending.iter().any(|p| path.starts_with(p))
}

/// Call a bundle hook, turning a panic into an error
fn guarded<F>(name: &str, hook: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(result) => result,
        Err(_) => Err(Error::bundle(name, "hook panicked")),
    }
}
