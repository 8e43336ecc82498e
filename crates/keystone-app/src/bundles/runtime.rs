//! Running bundle code
//!
//! The lifecycle manager decides *when* a bundle starts and stops; a
//! [`BundleRuntime`] decides *how*.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::{Child, Command};

use keystone_core::prelude::*;
use keystone_core::{BundleId, FeatureFlags};

use super::lifecycle::InstalledBundle;

/// Environment variable carrying the bundle id to a bundle process
pub const BUNDLE_ID_ENV: &str = "KEYSTONE_BUNDLE_ID";

/// Hooks the lifecycle manager calls for each bundle.
///
/// Hooks are called on the UI thread and are expected to return quickly.
pub trait BundleRuntime: Send + fmt::Debug {
    /// Receive the launch feature flags before any bundle starts
    fn apply_flags(&mut self, _flags: FeatureFlags) {}

    /// Run the bundle's entry point
    fn start(&mut self, bundle: &InstalledBundle) -> Result<()>;

    fn stop(&mut self, bundle: &InstalledBundle) -> Result<()>;

    /// Bring an injected plugin's UI up once after it started
    fn show(&mut self, _bundle: &InstalledBundle) -> Result<()> {
        Ok(())
    }

    /// Run a `--run` script to completion and return its exit code
    fn run_script(&mut self, script: &Path) -> Result<i32>;
}

/// Runs each bundle's `entry` as a child process.
///
/// Children inherit the set feature flags as `KEYSTONE_DISABLE_*=1`.
#[derive(Debug, Default)]
pub struct ProcessRuntime {
    children: HashMap<BundleId, Child>,
    flags: FeatureFlags,
}

impl ProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }
}

impl BundleRuntime for ProcessRuntime {
    fn apply_flags(&mut self, flags: FeatureFlags) {
        self.flags = flags;
    }

    fn start(&mut self, bundle: &InstalledBundle) -> Result<()> {
        let Some(entry) = &bundle.manifest.entry else {
            // Resource-only bundle (themes, libraries)
            debug!("Bundle {} has no entry point", bundle.name);
            return Ok(());
        };
        if self.children.contains_key(&bundle.id) {
            return Err(Error::bundle(&bundle.name, "already running"));
        }

        let base = bundle.path.parent().unwrap_or(Path::new("."));
        let program = base.join(entry);
        let child = Command::new(&program)
            .args(&bundle.manifest.args)
            .current_dir(base)
            .env(BUNDLE_ID_ENV, bundle.id.to_string())
            .envs(self.flags.env_vars())
            .spawn()
            .map_err(|e| {
                Error::bundle(&bundle.name, format!("failed to launch {}: {}", program.display(), e))
            })?;

        debug!("Bundle {} running as pid {}", bundle.name, child.id());
        self.children.insert(bundle.id, child);
        Ok(())
    }

    fn stop(&mut self, bundle: &InstalledBundle) -> Result<()> {
        let Some(mut child) = self.children.remove(&bundle.id) else {
            return Ok(());
        };
        match child.try_wait()? {
            Some(status) => debug!("Bundle {} already exited with {}", bundle.name, status),
            None => {
                child
                    .kill()
                    .map_err(|e| Error::bundle(&bundle.name, format!("failed to stop: {}", e)))?;
                let _ = child.wait();
                debug!("Bundle {} stopped", bundle.name);
            }
        }
        Ok(())
    }

    fn show(&mut self, bundle: &InstalledBundle) -> Result<()> {
        info!("Showing {}", bundle.name);
        Ok(())
    }

    fn run_script(&mut self, script: &Path) -> Result<i32> {
        info!("Running script {}", script.display());
        let status = Command::new(script)
            .envs(self.flags.env_vars())
            .status()
            .map_err(|e| Error::bundle(script.display().to_string(), e.to_string()))?;
        Ok(status.code().unwrap_or(1))
    }
}

impl Drop for ProcessRuntime {
    fn drop(&mut self) {
        for (id, mut child) in self.children.drain() {
            warn!("Killing bundle process {} left running", id);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundles::manifest::parse_manifest;
    use keystone_core::RunningState;
    use tempfile::tempdir;

    fn bundle(dir: &Path, entry: Option<&str>) -> InstalledBundle {
        let path = dir.join("t.bundle");
        let mut content = String::from(
            "id = \"00000000-0000-4000-8000-0000000000aa\"\nname = \"Test\"\nrole = \"plugin\"\n",
        );
        if let Some(entry) = entry {
            content.push_str(&format!("entry = \"{}\"\n", entry));
        }
        let manifest = parse_manifest(&path, &content).unwrap();
        InstalledBundle {
            id: manifest.id,
            name: manifest.name.clone(),
            role: manifest.role,
            path,
            manifest,
            state: RunningState::NotStarted,
            enabled: true,
        }
    }

    #[test]
    fn test_start_without_entry_is_noop() {
        let dir = tempdir().unwrap();
        let mut runtime = ProcessRuntime::new();
        runtime.start(&bundle(dir.path(), None)).unwrap();
        assert_eq!(runtime.running(), 0);
    }

    #[test]
    fn test_missing_entry_program_fails() {
        let dir = tempdir().unwrap();
        let mut runtime = ProcessRuntime::new();
        let err = runtime
            .start(&bundle(dir.path(), Some("bin/missing")))
            .unwrap_err();
        assert!(matches!(err, Error::Bundle { .. }));
    }

    #[test]
    fn test_stop_unknown_is_ok() {
        let dir = tempdir().unwrap();
        let mut runtime = ProcessRuntime::new();
        assert!(runtime.stop(&bundle(dir.path(), None)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_start_and_stop_child_process() {
        let dir = tempdir().unwrap();
        let mut b = bundle(dir.path(), Some("/bin/sleep"));
        b.manifest.args = vec!["30".into()];

        let mut runtime = ProcessRuntime::new();
        runtime.start(&b).unwrap();
        assert_eq!(runtime.running(), 1);
        assert!(runtime.start(&b).is_err());
        runtime.stop(&b).unwrap();
        assert_eq!(runtime.running(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_run_script_returns_exit_code() {
        let mut runtime = ProcessRuntime::new();
        assert_eq!(runtime.run_script(Path::new("/bin/true")).unwrap(), 0);
        assert_eq!(runtime.run_script(Path::new("/bin/false")).unwrap(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_applied_flags_reach_bundle_process() {
        let dir = tempdir().unwrap();
        let mut b = bundle(dir.path(), Some("/bin/sh"));
        b.manifest.args = vec![
            "-c".into(),
            "test \"$KEYSTONE_DISABLE_ANIMATION\" = 1 && test -z \"$KEYSTONE_DISABLE_FILTER_THREADS\"".into(),
        ];

        let mut plain = ProcessRuntime::new();
        plain.start(&b).unwrap();
        let status = plain.children.get_mut(&b.id).unwrap().wait().unwrap();
        assert!(!status.success());

        let mut flagged = ProcessRuntime::new();
        flagged.apply_flags(FeatureFlags {
            disable_animation: true,
            ..Default::default()
        });
        flagged.start(&b).unwrap();
        let status = flagged.children.get_mut(&b.id).unwrap().wait().unwrap();
        assert!(status.success());
    }
}
