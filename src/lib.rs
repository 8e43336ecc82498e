//! Keystone Library
//!
//! Startup orchestration, single-instance coordination and bundle lifecycle
//! for the Keystone editor.

pub use keystone_app as app;
pub use keystone_core as core;
pub use keystone_instance as instance;

// Re-export main entry points
pub use keystone_app::bootstrap::run;
pub use keystone_app::{Bootstrapper, HeadlessShell, ProcessRuntime};
pub use keystone_core::{ExitStatus, LaunchArguments};
