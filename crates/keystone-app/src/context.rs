//! The application context
//!
//! One [`Application`] exists per process. It is built during the launch stage
//! and handed (as `Arc<Application>`) to everything that needs shared state.
//! Building a second one while the first is alive fails with
//! [`Error::AlreadyRunning`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use keystone_core::prelude::*;
use keystone_core::versioning::{self, GateOutcome};
use keystone_core::{ExitStatus, LaunchArguments, OpenQueueEntry, BUILD_NUMBER};

use crate::bundles::BundleLifecycleManager;
use crate::config::SettingsStore;
use crate::deletion::DeletionQueue;
use crate::open_queue::FileOpenQueue;
use crate::registry::{self, GameDataRegistry};
use crate::shell::Shell;
use crate::ui_thread::UiHandle;

// Set while an `Application` exists; `new` claims it and `Drop` clears it.
// This only guards against a second context in one process. Nothing reads it
// to find the current context; that is always passed as `Arc<Application>`.
static ALIVE: AtomicBool = AtomicBool::new(false);

/// State owned by the UI thread
#[derive(Default)]
pub struct UiState {
    pub app: Option<Arc<Application>>,
    pub bundles: Option<BundleLifecycleManager>,
    pub maintenance: Option<tokio::task::JoinHandle<()>>,
}

/// Filesystem locations the application works from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roots {
    /// Writable per-user storage
    pub storage: PathBuf,
    /// Read-only install location (system bundles, baseline game data)
    pub install: PathBuf,
}

impl Roots {
    pub fn gamedata_dir(&self) -> PathBuf {
        self.install.join("gamedata")
    }
}

pub struct Application {
    args: LaunchArguments,
    roots: Roots,
    settings: Arc<SettingsStore>,
    open_queue: Arc<FileOpenQueue>,
    deletions: DeletionQueue,
    registry: Arc<GameDataRegistry>,
    installed_resources: BTreeSet<String>,
    shell: Arc<dyn Shell>,
    ui: UiHandle<UiState>,
    runtime: Option<tokio::runtime::Handle>,
    exit_tx: mpsc::UnboundedSender<ExitStatus>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("roots", &self.roots)
            .field("args", &self.args)
            .finish()
    }
}

impl Application {
    /// Build the process-wide context.
    ///
    /// Returns the context and the receiver of exit requests.
    pub fn new(
        args: LaunchArguments,
        roots: Roots,
        settings: Arc<SettingsStore>,
        shell: Arc<dyn Shell>,
        ui: UiHandle<UiState>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<ExitStatus>)> {
        // Claim before building anything so a losing caller has no side effects
        if ALIVE.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let deletions = DeletionQueue::new(Arc::clone(&settings), roots.storage.clone());
        let installed_resources = registry::core_resources(&roots.gamedata_dir());
        debug!("Installed core resources: {:?}", installed_resources);

        let app = Arc::new(Self {
            args,
            settings,
            open_queue: Arc::new(FileOpenQueue::new()),
            deletions,
            registry: Arc::new(GameDataRegistry::new()),
            installed_resources,
            shell,
            ui,
            runtime: tokio::runtime::Handle::try_current().ok(),
            exit_tx,
            roots,
        });
        Ok((app, exit_rx))
    }

    pub fn args(&self) -> &LaunchArguments {
        &self.args
    }

    pub fn roots(&self) -> &Roots {
        &self.roots
    }

    pub fn storage_root(&self) -> &Path {
        &self.roots.storage
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn open_queue(&self) -> &Arc<FileOpenQueue> {
        &self.open_queue
    }

    pub fn deletions(&self) -> &DeletionQueue {
        &self.deletions
    }

    pub fn registry(&self) -> &Arc<GameDataRegistry> {
        &self.registry
    }

    pub fn installed_resources(&self) -> &BTreeSet<String> {
        &self.installed_resources
    }

    pub fn shell(&self) -> &Arc<dyn Shell> {
        &self.shell
    }

    pub fn ui(&self) -> &UiHandle<UiState> {
        &self.ui
    }

    pub fn runtime(&self) -> Option<&tokio::runtime::Handle> {
        self.runtime.as_ref()
    }

    /// Ask the launcher to shut down and exit with `status`
    pub fn request_exit(&self, status: ExitStatus) {
        info!("Exit requested ({:?})", status);
        let _ = self.exit_tx.send(status);
    }

    /// Open everything queued so far. UI thread only.
    ///
    /// Project files whose requirement is unmet are opened only if the user
    /// agrees; declining skips that file alone.
    pub fn drain_open_queue(&self) -> usize {
        self.ui.assert_on_ui_thread();
        self.open_queue.drain(|entry| self.open_entry(&entry))
    }

    fn open_entry(&self, entry: &OpenQueueEntry) {
        if let Some(path) = entry.path() {
            if let Some(requirement) = self.shell.project_requirement(path) {
                let outcome =
                    versioning::check(&requirement, BUILD_NUMBER, &self.installed_resources);
                if let GateOutcome::Unsatisfied(unmet) = outcome {
                    let subject = path.display().to_string();
                    if !self.shell.confirm_unmet_requirement(&subject, &unmet) {
                        info!("Not opening {}: {}", subject, unmet);
                        return;
                    }
                }
            }
        }
        if let Err(e) = self.shell.open(entry) {
            warn!("Failed to open {}: {}", entry, e);
        }
    }

    /// Raise the main window and open what other instances forwarded.
    ///
    /// Before the main window exists this does nothing; startup drains the
    /// queue itself once the window is shown. UI thread only.
    pub fn bring_to_front_and_drain(&self) {
        self.ui.assert_on_ui_thread();
        if !self.shell.has_main_window() {
            debug!("Forwarded paths queued until the main window exists");
            return;
        }
        self.shell.bring_to_front();
        self.drain_open_queue();
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        ALIVE.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::{HeadlessShell, ShellEvent};
    use crate::ui_thread::UiThread;
    use keystone_core::VersionRequirement;
    use serial_test::serial;
    use tempfile::tempdir;

    fn roots(dir: &Path) -> Roots {
        Roots {
            storage: dir.join("storage"),
            install: dir.join("install"),
        }
    }

    #[test]
    #[serial]
    fn test_second_application_is_rejected() {
        let dir = tempdir().unwrap();
        let ui = UiThread::<UiState>::spawn("ctx-ui").unwrap();
        let shell: Arc<dyn Shell> = Arc::new(HeadlessShell::new());
        let settings = Arc::new(SettingsStore::in_memory());

        let (first, _rx) = Application::new(
            LaunchArguments::default(),
            roots(dir.path()),
            Arc::clone(&settings),
            Arc::clone(&shell),
            ui.handle(),
        )
        .unwrap();

        let second = Application::new(
            LaunchArguments::default(),
            roots(dir.path()),
            Arc::clone(&settings),
            Arc::clone(&shell),
            ui.handle(),
        );
        assert!(matches!(second, Err(Error::AlreadyRunning)));

        drop(first);
        let third = Application::new(
            LaunchArguments::default(),
            roots(dir.path()),
            settings,
            shell,
            ui.handle(),
        );
        assert!(third.is_ok());
        drop(third);
        ui.join();
    }

    #[test]
    #[serial]
    fn test_drain_gates_project_requirements() {
        let dir = tempdir().unwrap();
        let ui = UiThread::<UiState>::spawn("ctx-ui").unwrap();
        let future = VersionRequirement {
            min_build: Some(BUILD_NUMBER + 1),
            ..Default::default()
        };
        let shell = Arc::new(
            HeadlessShell::new().with_project_requirement("/p/new.foo", future),
        );
        let (app, _rx) = Application::new(
            LaunchArguments::default(),
            roots(dir.path()),
            Arc::new(SettingsStore::in_memory()),
            shell.clone(),
            ui.handle(),
        )
        .unwrap();

        app.open_queue().push(PathBuf::from("/p/old.foo"));
        app.open_queue().push(PathBuf::from("/p/new.foo"));
        let a = Arc::clone(&app);
        let drained = ui.handle().call(move |_| a.drain_open_queue()).unwrap();
        assert_eq!(drained, 2);

        assert_eq!(
            shell.events(),
            vec![
                ShellEvent::Opened(OpenQueueEntry::FilePath("/p/old.foo".into())),
                ShellEvent::Prompted("/p/new.foo".into()),
            ]
        );
        drop(app);
        ui.join();
    }

    #[test]
    #[serial]
    fn test_request_exit_reaches_receiver() {
        let dir = tempdir().unwrap();
        let ui = UiThread::<UiState>::spawn("ctx-ui").unwrap();
        let (app, mut rx) = Application::new(
            LaunchArguments::default(),
            roots(dir.path()),
            Arc::new(SettingsStore::in_memory()),
            Arc::new(HeadlessShell::new()),
            ui.handle(),
        )
        .unwrap();
        app.request_exit(ExitStatus::UnsupportedRuntime);
        assert_eq!(rx.try_recv().ok(), Some(ExitStatus::UnsupportedRuntime));
        drop(app);
        ui.join();
    }
}
