//! keystone-app - Startup orchestration and bundle lifecycle for Keystone
//!
//! This crate sequences application startup across a launch stage and a UI
//! stage, owns the UI thread, the open-file queue and the pending-deletion
//! list, and starts and stops installed bundles by role.

pub mod background;
pub mod bootstrap;
pub mod bundles;
pub mod config;
pub mod context;
pub mod deletion;
pub mod diagnostics;
pub mod locale;
pub mod observers;
pub mod open_queue;
pub mod registry;
pub mod shell;
pub mod signals;
pub mod ui_thread;

// Re-export primary types
pub use background::{BackgroundInitHandle, BackgroundInitRunner, InitTask};
pub use bootstrap::{Bootstrapper, RunningApp, Startup};
pub use bundles::{BundleEvent, BundleLifecycleManager, BundleRuntime, ProcessRuntime};
pub use config::SettingsStore;
pub use context::{Application, Roots, UiState};
pub use deletion::{DeletionQueue, DeletionReport};
pub use open_queue::FileOpenQueue;
pub use registry::GameDataRegistry;
pub use shell::{HeadlessShell, Shell, ShellEvent, StartupStage};
pub use ui_thread::{UiHandle, UiThread};
