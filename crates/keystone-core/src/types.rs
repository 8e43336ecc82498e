//! Shared domain types

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable bundle identity
pub type BundleId = uuid::Uuid;

/// What a bundle is for, and therefore in which startup phase it loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleRole {
    /// Loaded after background init, before the registry is locked
    Extension,
    /// Plugin started by `load_plugins` but not shown
    #[serde(rename = "plugin")]
    ActivatedPlugin,
    /// Plugin started by `load_plugins` and shown once
    #[serde(rename = "injected-plugin")]
    InjectedPlugin,
    /// Loaded before everything else
    Library,
    /// Loaded before everything else, right after libraries
    Theme,
}

impl BundleRole {
    /// Roles handled by `load_plugins` / `unload_plugins`
    pub fn is_plugin(self) -> bool {
        match self {
            BundleRole::ActivatedPlugin | BundleRole::InjectedPlugin => true,
            BundleRole::Extension | BundleRole::Library | BundleRole::Theme => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BundleRole::Extension => "extension",
            BundleRole::ActivatedPlugin => "plugin",
            BundleRole::InjectedPlugin => "injected-plugin",
            BundleRole::Library => "library",
            BundleRole::Theme => "theme",
        }
    }
}

impl fmt::Display for BundleRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running state of a bundle. Only the lifecycle manager changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunningState {
    #[default]
    NotStarted,
    Started,
    /// Start hook failed; not running, retried on the next load
    Failed,
    Stopped,
}

impl RunningState {
    pub fn is_running(self) -> bool {
        matches!(self, RunningState::Started)
    }
}

/// A pending "open this" request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenQueueEntry {
    FilePath(PathBuf),
    /// Legacy URL form accepted from desktop open events
    Url(String),
}

impl OpenQueueEntry {
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            OpenQueueEntry::FilePath(p) => Some(p),
            OpenQueueEntry::Url(_) => None,
        }
    }
}

impl From<PathBuf> for OpenQueueEntry {
    fn from(path: PathBuf) -> Self {
        OpenQueueEntry::FilePath(path)
    }
}

impl fmt::Display for OpenQueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenQueueEntry::FilePath(p) => write!(f, "{}", p.display()),
            OpenQueueEntry::Url(u) => f.write_str(u),
        }
    }
}
