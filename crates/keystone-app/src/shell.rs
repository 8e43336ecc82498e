//! Boundary between startup orchestration and the concrete UI
//!
//! Everything visual (splash, main window, dialogs) lives behind [`Shell`].
//! Methods other than `background_tasks` are called on the UI thread.
//! [`HeadlessShell`] is the implementation used by the binary and by tests.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use keystone_core::prelude::*;
use keystone_core::{FeatureFlags, OpenQueueEntry, Unmet, VersionRequirement};

use crate::background::InitTask;

/// Startup progress milestones, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StartupStage {
    Splash,
    Locale,
    RuntimeCheck,
    Storage,
    Deletions,
    Libraries,
    Themes,
    BackgroundInit,
    MainWindow,
    Extensions,
    Plugins,
    Ready,
}

impl StartupStage {
    pub fn label(self) -> &'static str {
        match self {
            StartupStage::Splash => "Starting",
            StartupStage::Locale => "Selecting language",
            StartupStage::RuntimeCheck => "Checking runtime",
            StartupStage::Storage => "Preparing storage",
            StartupStage::Deletions => "Cleaning up",
            StartupStage::Libraries => "Loading libraries",
            StartupStage::Themes => "Loading themes",
            StartupStage::BackgroundInit => "Loading game data",
            StartupStage::MainWindow => "Creating main window",
            StartupStage::Extensions => "Loading extensions",
            StartupStage::Plugins => "Loading plugins",
            StartupStage::Ready => "Ready",
        }
    }
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The UI as seen from startup orchestration
pub trait Shell: Send + Sync {
    fn show_progress(&self, stage: StartupStage, detail: &str);

    /// Terminal error dialog. The process exits afterwards.
    fn show_fatal_error(&self, error: &Error);

    /// Version of the UI runtime, if it can be determined
    fn runtime_version(&self) -> Option<(u32, u32)>;

    fn create_main_window(&self, flags: FeatureFlags) -> Result<()>;

    fn has_main_window(&self) -> bool;

    fn show_main_window(&self);

    /// De-iconify and raise the main window
    fn bring_to_front(&self);

    fn open(&self, entry: &OpenQueueEntry) -> Result<()>;

    /// Requirement declared by a project file, if any
    fn project_requirement(&self, _path: &Path) -> Option<VersionRequirement> {
        None
    }

    /// Ask the user whether to continue despite an unmet requirement
    fn confirm_unmet_requirement(&self, subject: &str, unmet: &Unmet) -> bool;

    fn check_for_updates(&self) {
        debug!("No update source configured");
    }

    /// Extra work for the background init thread
    fn background_tasks(&self) -> Vec<InitTask> {
        Vec::new()
    }

    /// Close splash and progress feedback
    fn dispose_startup_ui(&self);
}

/// What a [`HeadlessShell`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Progress(StartupStage),
    Fatal(String),
    MainWindowCreated,
    MainWindowShown,
    BroughtToFront,
    Opened(OpenQueueEntry),
    Prompted(String),
    UpdateCheck,
    StartupUiDisposed,
}

/// Shell without a window system.
///
/// Logs everything, prints fatal errors to stderr and records each call as a
/// [`ShellEvent`].
#[derive(Default)]
pub struct HeadlessShell {
    accept_unmet: bool,
    runtime_version: Option<(u32, u32)>,
    requirements: HashMap<PathBuf, VersionRequirement>,
    tasks: Mutex<Vec<InitTask>>,
    window: Mutex<bool>,
    events: Mutex<Vec<ShellEvent>>,
}

impl fmt::Debug for HeadlessShell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessShell")
            .field("accept_unmet", &self.accept_unmet)
            .field("runtime_version", &self.runtime_version)
            .finish()
    }
}

impl HeadlessShell {
    pub fn new() -> Self {
        Self {
            runtime_version: Some(keystone_core::MIN_RUNTIME_VERSION),
            ..Self::default()
        }
    }

    /// Answer "yes" to every unmet-requirement prompt
    pub fn with_accept_unmet(mut self, accept: bool) -> Self {
        self.accept_unmet = accept;
        self
    }

    pub fn with_runtime_version(mut self, version: Option<(u32, u32)>) -> Self {
        self.runtime_version = version;
        self
    }

    pub fn with_project_requirement(
        mut self,
        path: impl Into<PathBuf>,
        requirement: VersionRequirement,
    ) -> Self {
        self.requirements.insert(path.into(), requirement);
        self
    }

    pub fn with_background_task(self, task: InitTask) -> Self {
        lock(&self.tasks).push(task);
        self
    }

    pub fn events(&self) -> Vec<ShellEvent> {
        lock(&self.events).clone()
    }

    fn record(&self, event: ShellEvent) {
        lock(&self.events).push(event);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shell for HeadlessShell {
    fn show_progress(&self, stage: StartupStage, detail: &str) {
        if detail.is_empty() {
            info!("{}", stage);
        } else {
            info!("{}: {}", stage, detail);
        }
        self.record(ShellEvent::Progress(stage));
    }

    fn show_fatal_error(&self, error: &Error) {
        error!("Fatal: {}", error);
        eprintln!("keystone: {}", error);
        self.record(ShellEvent::Fatal(error.to_string()));
    }

    fn runtime_version(&self) -> Option<(u32, u32)> {
        self.runtime_version
    }

    fn create_main_window(&self, flags: FeatureFlags) -> Result<()> {
        debug!("Creating headless main window ({:?})", flags);
        *lock(&self.window) = true;
        self.record(ShellEvent::MainWindowCreated);
        Ok(())
    }

    fn has_main_window(&self) -> bool {
        *lock(&self.window)
    }

    fn show_main_window(&self) {
        info!("Main window visible");
        self.record(ShellEvent::MainWindowShown);
    }

    fn bring_to_front(&self) {
        debug!("Bringing main window to front");
        self.record(ShellEvent::BroughtToFront);
    }

    fn open(&self, entry: &OpenQueueEntry) -> Result<()> {
        info!("Opening {}", entry);
        self.record(ShellEvent::Opened(entry.clone()));
        Ok(())
    }

    fn project_requirement(&self, path: &Path) -> Option<VersionRequirement> {
        self.requirements.get(path).cloned()
    }

    fn confirm_unmet_requirement(&self, subject: &str, unmet: &Unmet) -> bool {
        warn!(
            "{} {}; {}",
            subject,
            unmet,
            if self.accept_unmet { "continuing" } else { "declined" }
        );
        self.record(ShellEvent::Prompted(subject.to_string()));
        self.accept_unmet
    }

    fn check_for_updates(&self) {
        debug!("Update check (headless): nothing to do");
        self.record(ShellEvent::UpdateCheck);
    }

    fn background_tasks(&self) -> Vec<InitTask> {
        std::mem::take(&mut *lock(&self.tasks))
    }

    fn dispose_startup_ui(&self) {
        self.record(ShellEvent::StartupUiDisposed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_records_calls() {
        let shell = HeadlessShell::new();
        shell.show_progress(StartupStage::Splash, "");
        assert!(!shell.has_main_window());
        shell.create_main_window(FeatureFlags::default()).unwrap();
        assert!(shell.has_main_window());
        shell
            .open(&OpenQueueEntry::FilePath("a.foo".into()))
            .unwrap();

        assert_eq!(
            shell.events(),
            vec![
                ShellEvent::Progress(StartupStage::Splash),
                ShellEvent::MainWindowCreated,
                ShellEvent::Opened(OpenQueueEntry::FilePath("a.foo".into())),
            ]
        );
    }

    #[test]
    fn test_prompt_answer_follows_accept_unmet() {
        let unmet = Unmet {
            build: Some((9999, 1)),
            missing_resources: Vec::new(),
        };
        assert!(!HeadlessShell::new().confirm_unmet_requirement("x", &unmet));
        assert!(HeadlessShell::new()
            .with_accept_unmet(true)
            .confirm_unmet_requirement("x", &unmet));
    }

    #[test]
    fn test_background_tasks_are_handed_out_once() {
        let shell = HeadlessShell::new().with_background_task(InitTask::new("t", || Ok(())));
        assert_eq!(shell.background_tasks().len(), 1);
        assert!(shell.background_tasks().is_empty());
    }

    #[test]
    fn test_stage_order() {
        assert!(StartupStage::Libraries < StartupStage::BackgroundInit);
        assert!(StartupStage::Extensions < StartupStage::Plugins);
    }
}
