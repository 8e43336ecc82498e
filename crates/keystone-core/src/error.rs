//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

use crate::launch::ExitStatus;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Storage / Settings Errors
    // ─────────────────────────────────────────────────────────────
    #[error("No usable user storage location (last tried: {last_tried})")]
    StorageUnavailable { last_tried: PathBuf },

    #[error("Path is outside the user storage root: {path}")]
    OutsideStorageRoot { path: PathBuf },

    #[error("Settings error: {message}")]
    Settings { message: String },

    // ─────────────────────────────────────────────────────────────
    // Process Coordination Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Single-instance rendezvous error: {message}")]
    Instance { message: String },

    #[error("Instance protocol error: {message}")]
    Protocol { message: String },

    #[error("Restart lock error: {message}")]
    RestartLock { message: String },

    #[error("Another application context is already alive in this process")]
    AlreadyRunning,

    // ─────────────────────────────────────────────────────────────
    // Bundle Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid bundle manifest {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    #[error("Bundle {name} failed: {message}")]
    Bundle { name: String, message: String },

    #[error("Unknown bundle: {id}")]
    UnknownBundle { id: uuid::Uuid },

    #[error("Game data registry is locked; cannot register {key}")]
    RegistryLocked { key: String },

    // ─────────────────────────────────────────────────────────────
    // Startup Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Startup failed: {message}")]
    Startup { message: String },

    #[error("Background initialization failed in task {task}: {message}")]
    BackgroundInit { task: String, message: String },

    #[error("Unsupported runtime version {found} (requires {required} or newer)")]
    UnsupportedRuntime { found: String, required: String },

    #[error("Invalid --plugintest argument: {message}")]
    InvalidPluginTest { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("UI thread is no longer running")]
    UiThreadGone,

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings {
            message: message.into(),
        }
    }

    pub fn instance(message: impl Into<String>) -> Self {
        Self::Instance {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn restart_lock(message: impl Into<String>) -> Self {
        Self::RestartLock {
            message: message.into(),
        }
    }

    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn bundle(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bundle {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn startup(message: impl Into<String>) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    pub fn background_init(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackgroundInit {
            task: task.into(),
            message: message.into(),
        }
    }

    pub fn invalid_plugin_test(message: impl Into<String>) -> Self {
        Self::InvalidPluginTest {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Bundle { .. }
                | Error::Manifest { .. }
                | Error::RestartLock { .. }
                | Error::Protocol { .. }
                | Error::Settings { .. }
        )
    }

    /// Check if this error should trigger application exit
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::StorageUnavailable { .. }
                | Error::Startup { .. }
                | Error::BackgroundInit { .. }
                | Error::UnsupportedRuntime { .. }
                | Error::InvalidPluginTest { .. }
                | Error::AlreadyRunning
                | Error::UiThreadGone
        )
    }

    /// Process exit status used when this error ends the process
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Error::UnsupportedRuntime { .. } => ExitStatus::UnsupportedRuntime,
            Error::InvalidPluginTest { .. } => ExitStatus::InvalidPluginTest,
            Error::StorageUnavailable { .. } => ExitStatus::StorageUnavailable,
            _ => ExitStatus::Fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::bundle("Spellcheck", "entry point exited");
        assert_eq!(
            err.to_string(),
            "Bundle Spellcheck failed: entry point exited"
        );

        let err = Error::UnsupportedRuntime {
            found: "1.2".to_string(),
            required: "2.0".to_string(),
        };
        assert!(err.to_string().contains("requires 2.0"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::background_init("dictionary", "missing").is_fatal());
        assert!(Error::StorageUnavailable {
            last_tried: PathBuf::from("/tmp/keystone")
        }
        .is_fatal());
        assert!(!Error::bundle("a", "b").is_fatal());
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::bundle("a", "b").is_recoverable());
        assert!(Error::restart_lock("timeout").is_recoverable());
        assert!(!Error::AlreadyRunning.is_recoverable());
    }

    #[test]
    fn test_exit_status_mapping() {
        assert_eq!(
            Error::invalid_plugin_test("missing file").exit_status(),
            ExitStatus::InvalidPluginTest
        );
        assert_eq!(
            Error::UnsupportedRuntime {
                found: "1".into(),
                required: "2".into()
            }
            .exit_status(),
            ExitStatus::UnsupportedRuntime
        );
        assert_eq!(Error::ChannelClosed.exit_status(), ExitStatus::Fatal);
    }
}
