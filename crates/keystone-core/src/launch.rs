//! Launch arguments, environment-level feature flags and exit statuses
//!
//! `LaunchArguments` is parsed once by the binary and never mutated afterwards.
//! Components that need it receive a clone.

use std::ffi::OsStr;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Build number of this host. Bundles and projects declare a minimum against it.
pub const BUILD_NUMBER: u32 = 3107;

/// Minimum runtime version the UI layer supports.
pub const MIN_RUNTIME_VERSION: (u32, u32) = (1, 4);

/// Process exit statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal exit, `--version`, or forwarded to the running instance
    Success,
    /// Any other fatal startup failure
    Fatal,
    /// The UI runtime is older than [`MIN_RUNTIME_VERSION`]
    UnsupportedRuntime,
    /// `--plugintest` named something that is not a bundle file
    InvalidPluginTest,
    /// No user storage location could be used
    StorageUnavailable,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Fatal => 1,
            ExitStatus::UnsupportedRuntime => 2,
            ExitStatus::InvalidPluginTest => 3,
            ExitStatus::StorageUnavailable => 4,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code())
    }
}

/// Diagnostic switches fixed before any UI subsystem starts.
///
/// They travel inside [`LaunchArguments`]; there is no process-wide copy. The
/// UI stage reads them directly and bundle processes receive them through
/// [`FeatureFlags::env_vars`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    pub disable_animation: bool,
    /// Run the background-init task list on the caller instead of a worker
    pub disable_background_init: bool,
    pub disable_filter_threads: bool,
    /// Skip the UI runtime version check
    pub disable_runtime_check: bool,
}

pub const DISABLE_ANIMATION_ENV: &str = "KEYSTONE_DISABLE_ANIMATION";
pub const DISABLE_BACKGROUND_INIT_ENV: &str = "KEYSTONE_DISABLE_BACKGROUND_INIT";
pub const DISABLE_FILTER_THREADS_ENV: &str = "KEYSTONE_DISABLE_FILTER_THREADS";
pub const DISABLE_RUNTIME_CHECK_ENV: &str = "KEYSTONE_DISABLE_RUNTIME_CHECK";

impl FeatureFlags {
    /// Environment entries for the flags that are set, each with value `1`.
    pub fn env_vars(self) -> Vec<(&'static str, &'static str)> {
        [
            (DISABLE_ANIMATION_ENV, self.disable_animation),
            (DISABLE_BACKGROUND_INIT_ENV, self.disable_background_init),
            (DISABLE_FILTER_THREADS_ENV, self.disable_filter_threads),
            (DISABLE_RUNTIME_CHECK_ENV, self.disable_runtime_check),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| (name, "1"))
        .collect()
    }
}

/// Parsed command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchArguments {
    /// `--version`: print the build number and exit
    pub print_version: bool,
    /// UI locale override (`--ulang`)
    pub ui_locale: Option<String>,
    /// Game-data locale override (`--glang`)
    pub game_locale: Option<String>,
    /// Log filter directive (`--loglevel`)
    pub log_level: Option<String>,
    /// Files or directories to open
    pub files: Vec<PathBuf>,
    /// Non-interactive script runner mode (`--run`)
    pub run_script: Option<PathBuf>,
    /// Bundle files forced into discovery (`--plugintest`)
    pub plugin_test: Option<Vec<PathBuf>>,
    pub flags: FeatureFlags,
    /// Lock file left by the instance this process replaces
    pub restart_lock: Option<PathBuf>,
}

impl LaunchArguments {
    /// Whether discovery is replaced by the `--plugintest` list.
    pub fn is_plugin_test(&self) -> bool {
        self.plugin_test.is_some()
    }

    /// Whether the process should exit after running a script.
    pub fn is_script_runner(&self) -> bool {
        self.run_script.is_some()
    }

    /// Check arguments that can be rejected before anything else runs.
    pub fn validate(&self) -> Result<()> {
        if let Some(bundles) = &self.plugin_test {
            if bundles.is_empty() {
                return Err(Error::invalid_plugin_test("no bundle files given"));
            }
            for bundle in bundles {
                if !bundle.is_file() {
                    return Err(Error::invalid_plugin_test(format!(
                        "{} is not a bundle file",
                        bundle.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Split a `--plugintest` value on the platform path separator.
pub fn parse_plugin_test_list(raw: &OsStr) -> Vec<PathBuf> {
    std::env::split_paths(raw)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            ExitStatus::Success,
            ExitStatus::Fatal,
            ExitStatus::UnsupportedRuntime,
            ExitStatus::InvalidPluginTest,
            ExitStatus::StorageUnavailable,
        ]
        .map(ExitStatus::code);
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(ExitStatus::Success.code(), 0);
    }

    #[test]
    fn test_parse_plugin_test_list() {
        let joined = std::env::join_paths(["/a/one.bundle", "/b/two.bundle"]).unwrap();
        let parsed = parse_plugin_test_list(&joined);
        assert_eq!(
            parsed,
            vec![
                PathBuf::from("/a/one.bundle"),
                PathBuf::from("/b/two.bundle")
            ]
        );
    }

    #[test]
    fn test_validate_rejects_missing_plugin_test_file() {
        let args = LaunchArguments {
            plugin_test: Some(vec![PathBuf::from("/definitely/not/here.bundle")]),
            ..Default::default()
        };
        let err = args.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidPluginTest { .. }));
    }

    #[test]
    fn test_validate_rejects_empty_plugin_test_list() {
        let args = LaunchArguments {
            plugin_test: Some(Vec::new()),
            ..Default::default()
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_existing_plugin_test_file() {
        let dir = tempdir().unwrap();
        let bundle = dir.path().join("a.bundle");
        std::fs::write(&bundle, "").unwrap();
        let args = LaunchArguments {
            plugin_test: Some(vec![bundle]),
            ..Default::default()
        };
        assert!(args.validate().is_ok());
        assert!(args.is_plugin_test());
    }

    #[test]
    fn test_env_vars_only_lists_set_flags() {
        assert!(FeatureFlags::default().env_vars().is_empty());
        let flags = FeatureFlags {
            disable_animation: true,
            disable_runtime_check: true,
            ..Default::default()
        };
        assert_eq!(
            flags.env_vars(),
            vec![(DISABLE_ANIMATION_ENV, "1"), (DISABLE_RUNTIME_CHECK_ENV, "1")]
        );
    }

    #[test]
    fn test_clone_is_deep() {
        let args = LaunchArguments {
            files: vec![PathBuf::from("x.foo")],
            ..Default::default()
        };
        let mut copy = args.clone();
        copy.files.push(PathBuf::from("y.foo"));
        assert_eq!(args.files.len(), 1);
    }
}
