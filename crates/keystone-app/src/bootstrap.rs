//! Startup sequencing
//!
//! Two stages:
//!
//! 1. **Launch stage** (async, off the UI thread): arguments, feature flags,
//!    diagnostics, restart lock, storage root, settings, single-instance claim.
//! 2. **UI stage** (on the UI thread): splash, locale, runtime check, storage
//!    folders, pending deletions, library and theme bundles, background init in
//!    parallel with main window construction, the background barrier, extension
//!    bundles, registry lock, plugins, then either the `--run` script or the
//!    visible main window, the open queue and the maintenance timer.
//!
//! Ordering between the stages is enforced by scheduling the whole UI stage as
//! one job on the UI thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use keystone_core::prelude::*;
use keystone_core::{storage, BundleRole, ExitStatus, FeatureFlags, LaunchArguments, BUILD_NUMBER};
use keystone_instance::{
    Claim, ForwardCallback, InstanceOwner, RestartCoordinator, SingleInstanceCoordinator,
    DEFAULT_FORWARD_TIMEOUT, DEFAULT_MAX_WAIT,
};

use crate::background::{BackgroundInitRunner, InitTask};
use crate::bundles::{BundleLifecycleManager, BundleRuntime, DiscoverySource};
use crate::config::{keys, SettingsStore, DEFAULTS};
use crate::context::{Application, Roots, UiState};
use crate::diagnostics;
use crate::locale;
use crate::shell::{Shell, StartupStage};
use crate::signals;
use crate::ui_thread::{UiHandle, UiThread};

/// Name of the UI-owning thread
pub const UI_THREAD_NAME: &str = "keystone-ui";

/// Interval of the open-queue / update-check tick
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Folders created under the user storage root at startup
const STORAGE_FOLDERS: &[&str] = &["bundles", "projects", "cache"];

/// Outcome of the launch stage
pub enum Startup {
    /// Nothing more to do (`--version`, forwarded, fatal error)
    Exited(ExitStatus),
    /// This process owns the application; the UI stage is scheduled
    Running(RunningApp),
}

impl std::fmt::Debug for Startup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Startup::Exited(status) => f.debug_tuple("Exited").field(status).finish(),
            Startup::Running(_) => f.write_str("Running"),
        }
    }
}

pub struct Bootstrapper {
    args: LaunchArguments,
    shell: Arc<dyn Shell>,
    runtime: Box<dyn BundleRuntime>,
    roots: Option<Roots>,
    restart_wait: Duration,
    forward_timeout: Duration,
    maintenance_interval: Duration,
}

impl Bootstrapper {
    pub fn new(args: LaunchArguments, shell: Arc<dyn Shell>, runtime: Box<dyn BundleRuntime>) -> Self {
        Self {
            args,
            shell,
            runtime,
            roots: None,
            restart_wait: DEFAULT_MAX_WAIT,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
        }
    }

    /// Use fixed roots instead of resolving them from the environment
    pub fn with_roots(mut self, roots: Roots) -> Self {
        self.roots = Some(roots);
        self
    }

    pub fn with_restart_wait(mut self, wait: Duration) -> Self {
        self.restart_wait = wait;
        self
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Start, install signal handling, and wait for exit.
    pub async fn run(self) -> ExitStatus {
        match self.start().await {
            Startup::Exited(status) => status,
            Startup::Running(running) => {
                signals::spawn_signal_handler(Arc::downgrade(running.app()));
                running.wait().await
            }
        }
    }

    /// Run the launch stage and schedule the UI stage.
    ///
    /// Errors and panics in the launch stage are shown through the shell and
    /// turned into an exit status.
    pub async fn start(self) -> Startup {
        let shell = Arc::clone(&self.shell);
        let outcome = tokio::spawn(self.launch_stage()).await;

        let error = match outcome {
            Ok(Ok(startup)) => return startup,
            Ok(Err(e)) => e,
            Err(join_error) if join_error.is_panic() => Error::startup("launch stage panicked"),
            Err(join_error) => Error::startup(join_error.to_string()),
        };
        error!("Startup failed: {}", error);
        shell.show_fatal_error(&error);
        Startup::Exited(error.exit_status())
    }

    async fn launch_stage(self) -> Result<Startup> {
        let Bootstrapper {
            args,
            shell,
            mut runtime,
            roots,
            restart_wait,
            forward_timeout,
            maintenance_interval,
        } = self;

        if args.print_version {
            println!("keystone build {}", BUILD_NUMBER);
            return Ok(Startup::Exited(ExitStatus::Success));
        }
        args.validate()?;
        if args.flags != FeatureFlags::default() {
            info!("Feature flags: {:?}", args.flags);
        }
        runtime.apply_flags(args.flags);
        diagnostics::log_environment();

        if let Some(lock) = &args.restart_lock {
            if RestartCoordinator::new().acquire(lock, restart_wait).await {
                info!("Restart lock {} acquired", lock.display());
            } else {
                warn!(
                    "Previous instance still holds {}; continuing anyway",
                    lock.display()
                );
            }
        }

        let roots = match roots {
            Some(roots) => roots,
            None => Roots {
                storage: storage::resolve_user_storage()?,
                install: storage::install_dir(),
            },
        };
        info!("User storage: {}", roots.storage.display());
        let settings = Arc::new(SettingsStore::load(&roots.storage));

        let ui = UiThread::<UiState>::spawn(UI_THREAD_NAME)?;
        let (app, exit_rx) =
            match Application::new(args.clone(), roots, settings, shell, ui.handle()) {
                Ok(parts) => parts,
                Err(e) => {
                    join_ui(ui).await;
                    return Err(e);
                }
            };

        let mut owner: Option<InstanceOwner> = None;
        if args.is_plugin_test() || args.is_script_runner() {
            debug!("Single-instance check skipped for this launch mode");
        } else if !app.settings().get_bool(keys::SINGLE_INSTANCE, true) {
            info!("Single-instance limiting disabled");
        } else {
            let coordinator = SingleInstanceCoordinator::new(app.storage_root())
                .with_forward_timeout(forward_timeout);
            match coordinator
                .claim_or_forward(&args.files, forward_callback(&app))
                .await
            {
                Ok(Claim::Owned(o)) => owner = Some(o),
                Ok(Claim::Forwarded { accepted }) => {
                    info!("Handed {} path(s) to the running instance", accepted);
                    drop(app);
                    join_ui(ui).await;
                    return Ok(Startup::Exited(ExitStatus::Success));
                }
                Err(e) => warn!("Single-instance check failed ({}); starting independently", e),
            }
        }

        app.open_queue().push_paths(args.files.iter().cloned());

        let (ready_tx, ready_rx) = oneshot::channel();
        let stage_app = Arc::clone(&app);
        ui.handle().run_on_ui_thread(move |state| {
            let ok = run_ui_stage(state, stage_app, runtime, maintenance_interval);
            let _ = ready_tx.send(ok);
        })?;

        Ok(Startup::Running(RunningApp {
            app,
            ui,
            exit_rx,
            ready_rx: Some(ready_rx),
            ready: None,
            owner,
        }))
    }
}

/// Convenience wrapper: build a [`Bootstrapper`] with defaults and run it
pub async fn run(
    args: LaunchArguments,
    shell: Arc<dyn Shell>,
    runtime: Box<dyn BundleRuntime>,
) -> ExitStatus {
    Bootstrapper::new(args, shell, runtime).run().await
}

async fn join_ui(ui: UiThread<UiState>) {
    if tokio::task::spawn_blocking(move || ui.join()).await.is_err() {
        error!("Failed to join the UI thread");
    }
}

/// Queue forwarded paths and let the UI thread raise the window and drain.
fn forward_callback(app: &Arc<Application>) -> ForwardCallback {
    let weak = Arc::downgrade(app);
    Arc::new(move |paths: Vec<PathBuf>| {
        let Some(app) = weak.upgrade() else {
            return;
        };
        debug!("Received {} forwarded path(s)", paths.len());
        app.open_queue().push_paths(paths);
        let target = Arc::clone(&app);
        if let Err(e) = app
            .ui()
            .run_on_ui_thread(move |_| target.bring_to_front_and_drain())
        {
            warn!("Could not schedule forwarded paths: {}", e);
        }
    })
}

// ─────────────────────────────────────────────────────────────────
// UI stage
// ─────────────────────────────────────────────────────────────────

fn run_ui_stage(
    state: &mut UiState,
    app: Arc<Application>,
    runtime: Box<dyn BundleRuntime>,
    maintenance_interval: Duration,
) -> bool {
    state.app = Some(Arc::clone(&app));
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        ui_stage(state, &app, runtime, maintenance_interval)
    }));

    let error = match outcome {
        Ok(Ok(())) => return true,
        Ok(Err(e)) => e,
        Err(_) => Error::startup("UI stage panicked"),
    };
    error!("Startup failed on the UI thread: {}", error);
    app.shell().dispose_startup_ui();
    app.shell().show_fatal_error(&error);
    app.request_exit(error.exit_status());
    false
}

fn ui_stage(
    state: &mut UiState,
    app: &Arc<Application>,
    runtime: Box<dyn BundleRuntime>,
    maintenance_interval: Duration,
) -> Result<()> {
    app.ui().assert_on_ui_thread();
    let shell = Arc::clone(app.shell());
    let args = app.args();
    let roots = app.roots();

    shell.show_progress(StartupStage::Splash, "");

    let lang = std::env::var("LANG").ok();
    let locales = locale::select_locales(args, app.settings(), lang.as_deref());
    shell.show_progress(StartupStage::Locale, &locales.ui);

    shell.show_progress(StartupStage::RuntimeCheck, "");
    if args.flags.disable_runtime_check {
        info!("Runtime version check disabled");
    } else {
        diagnostics::check_runtime(shell.runtime_version())?;
    }
    app.settings().apply_defaults(DEFAULTS);

    shell.show_progress(StartupStage::Storage, "");
    for folder in STORAGE_FOLDERS {
        let path = roots.storage.join(folder);
        std::fs::create_dir_all(&path).map_err(|e| {
            error!("Failed to create {}: {}", path.display(), e);
            Error::StorageUnavailable {
                last_tried: path.clone(),
            }
        })?;
    }

    shell.show_progress(StartupStage::Deletions, "");
    let report = app.deletions().process_pending();
    if report != Default::default() {
        info!(
            "Pending deletions: {} deleted, {} re-queued, {} dropped",
            report.deleted.len(),
            report.requeued.len(),
            report.dropped.len()
        );
    }

    let source = match &args.plugin_test {
        Some(files) => DiscoverySource::PluginTest(files.clone()),
        None => DiscoverySource::standard(&roots.install, &roots.storage),
    };
    let prompt_shell = Arc::clone(&shell);
    let manager = BundleLifecycleManager::new(
        source,
        Arc::clone(app.settings()),
        app.deletions().clone(),
        runtime,
    )
    .with_host(BUILD_NUMBER, app.installed_resources().clone())
    .with_unmet_prompt(Arc::new(move |bundle, unmet| {
        prompt_shell.confirm_unmet_requirement(&bundle.name, unmet)
    }));
    let bundles = state.bundles.insert(manager);
    bundles.refresh();

    shell.show_progress(StartupStage::Libraries, "");
    bundles.load_role(BundleRole::Library, None);
    shell.show_progress(StartupStage::Themes, "");
    bundles.load_role(BundleRole::Theme, None);

    shell.show_progress(StartupStage::BackgroundInit, "");
    let registry = Arc::clone(app.registry());
    let gamedata = roots.gamedata_dir();
    let mut tasks = vec![InitTask::new("baseline-gamedata", move || {
        registry.load_baseline(&gamedata).map(|_| ())
    })];
    tasks.extend(shell.background_tasks());
    let init = BackgroundInitRunner::start(tasks, args.flags.disable_background_init);

    shell.show_progress(StartupStage::MainWindow, "");
    let window = shell.create_main_window(args.flags);

    // Nothing below may run before background init is done
    init.join()?;
    window?;

    let mut report_extension = |index: usize, total: usize, name: &str| {
        shell.show_progress(
            StartupStage::Extensions,
            &format!("{} ({}/{})", name, index + 1, total),
        );
    };
    bundles.load_role(BundleRole::Extension, Some(&mut report_extension));

    app.registry().lock();

    shell.show_progress(StartupStage::Plugins, "");
    bundles.load_plugins();

    if let Some(script) = &args.run_script {
        let status = match bundles.run_script(script) {
            Ok(0) => ExitStatus::Success,
            Ok(code) => {
                warn!("Script {} exited with {}", script.display(), code);
                ExitStatus::Fatal
            }
            Err(e) => {
                error!("Script {} failed: {}", script.display(), e);
                ExitStatus::Fatal
            }
        };
        shell.dispose_startup_ui();
        app.request_exit(status);
        return Ok(());
    }

    shell.show_main_window();
    app.drain_open_queue();
    state.maintenance = spawn_maintenance(app, maintenance_interval);

    shell.show_progress(StartupStage::Ready, "");
    shell.dispose_startup_ui();
    Ok(())
}

/// Periodic tick on the UI thread: open queued files and check for updates.
fn spawn_maintenance(
    app: &Application,
    interval: Duration,
) -> Option<tokio::task::JoinHandle<()>> {
    let Some(handle) = app.runtime() else {
        warn!("No async runtime; maintenance timer not started");
        return None;
    };
    let ui: UiHandle<UiState> = app.ui().clone();
    let interval = interval.max(Duration::from_millis(1));

    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let scheduled = ui.run_on_ui_thread(|state| {
                if let Some(app) = &state.app {
                    app.drain_open_queue();
                    app.shell().check_for_updates();
                }
            });
            if scheduled.is_err() {
                break;
            }
        }
    }))
}

// ─────────────────────────────────────────────────────────────────
// Running application
// ─────────────────────────────────────────────────────────────────

/// A started application owning the UI thread
pub struct RunningApp {
    app: Arc<Application>,
    ui: UiThread<UiState>,
    exit_rx: mpsc::UnboundedReceiver<ExitStatus>,
    ready_rx: Option<oneshot::Receiver<bool>>,
    ready: Option<bool>,
    owner: Option<InstanceOwner>,
}

impl RunningApp {
    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    pub fn ui(&self) -> UiHandle<UiState> {
        self.ui.handle()
    }

    /// Loopback address other instances forward to, when this process owns
    /// the single-instance role
    pub fn instance_addr(&self) -> Option<std::net::SocketAddr> {
        self.owner.as_ref().map(InstanceOwner::addr)
    }

    /// Wait for the UI stage. Returns false if it failed.
    pub async fn ready(&mut self) -> bool {
        if let Some(rx) = self.ready_rx.take() {
            self.ready = Some(rx.await.unwrap_or(false));
        }
        self.ready.unwrap_or(false)
    }

    /// Wait for an exit request, then shut down.
    pub async fn wait(mut self) -> ExitStatus {
        let status = self.exit_rx.recv().await.unwrap_or(ExitStatus::Fatal);
        self.shutdown().await;
        status
    }

    /// Stop bundles and the maintenance timer, save settings, stop the UI
    /// thread and release the single-instance role.
    pub async fn shutdown(self) {
        info!("Shutting down");
        let RunningApp { app, ui, owner, .. } = self;

        let scheduled = ui.handle().run_on_ui_thread(|state| {
            if let Some(task) = state.maintenance.take() {
                task.abort();
            }
            if let Some(mut bundles) = state.bundles.take() {
                bundles.stop_all();
            }
            state.app = None;
        });
        if let Err(e) = scheduled {
            warn!("UI thread gone before shutdown: {}", e);
        }
        join_ui(ui).await;

        if let Err(e) = app.settings().save() {
            warn!("Failed to save settings on exit: {}", e);
        }
        drop(owner);
        drop(app);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundles::ProcessRuntime;
    use crate::shell::{HeadlessShell, ShellEvent};
    use serial_test::serial;
    use tempfile::tempdir;

    fn roots(dir: &std::path::Path) -> Roots {
        Roots {
            storage: dir.join("storage"),
            install: dir.join("install"),
        }
    }

    #[tokio::test]
    async fn test_version_short_circuits() {
        let shell = Arc::new(HeadlessShell::new());
        let args = LaunchArguments {
            print_version: true,
            ..Default::default()
        };
        let startup = Bootstrapper::new(args, shell.clone(), Box::new(ProcessRuntime::new()))
            .start()
            .await;
        assert!(matches!(startup, Startup::Exited(ExitStatus::Success)));
        assert!(shell.events().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_plugin_test_exits_with_code() {
        let dir = tempdir().unwrap();
        let shell = Arc::new(HeadlessShell::new());
        let args = LaunchArguments {
            plugin_test: Some(vec![dir.path().join("missing.bundle")]),
            ..Default::default()
        };
        let status = Bootstrapper::new(args, shell.clone(), Box::new(ProcessRuntime::new()))
            .with_roots(roots(dir.path()))
            .run()
            .await;
        assert_eq!(status, ExitStatus::InvalidPluginTest);
        assert!(matches!(shell.events().as_slice(), [ShellEvent::Fatal(_)]));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn test_unsupported_runtime_is_fatal() {
        let dir = tempdir().unwrap();
        let shell = Arc::new(HeadlessShell::new().with_runtime_version(Some((1, 0))));
        let settings = SettingsStore::load(&dir.path().join("storage"));
        settings.set_bool(keys::SINGLE_INSTANCE, false);
        settings.save().unwrap();

        let status = Bootstrapper::new(LaunchArguments::default(), shell.clone(), Box::new(ProcessRuntime::new()))
            .with_roots(roots(dir.path()))
            .run()
            .await;
        assert_eq!(status, ExitStatus::UnsupportedRuntime);

        let events = shell.events();
        let disposed = events
            .iter()
            .position(|e| *e == ShellEvent::StartupUiDisposed)
            .unwrap();
        let fatal = events
            .iter()
            .position(|e| matches!(e, ShellEvent::Fatal(_)))
            .unwrap();
        assert!(disposed < fatal);
        assert!(!events.contains(&ShellEvent::MainWindowCreated));
    }
}
