//! Restart hand-over between an exiting instance and its replacement
//!
//! The old process creates the lock file, keeps an exclusive lock on it, spawns
//! the replacement with `--x-restart-lock <path>` and exits. The replacement
//! polls until it can take the lock (or the file is gone), then deletes it.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use fs2::FileExt;

use keystone_core::prelude::*;

/// Poll interval while waiting for the previous instance
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Longest wait before proceeding without the lock
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Flag the replacement process receives the lock path through
pub const RESTART_LOCK_FLAG: &str = "--x-restart-lock";

#[derive(Debug, Clone)]
pub struct RestartCoordinator {
    poll_interval: Duration,
}

impl Default for RestartCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RestartCoordinator {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Wait for the previous instance to release `lock_path`.
    ///
    /// Returns `true` as soon as the file is gone or this process deleted it,
    /// `false` once `max_wait` has elapsed. Never waits longer than `max_wait`
    /// plus one filesystem probe.
    pub async fn acquire(&self, lock_path: &Path, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if try_take(lock_path) {
                debug!("Restart lock {} acquired", lock_path.display());
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "Restart lock {} still held after {:?}; continuing without it",
                    lock_path.display(),
                    max_wait
                );
                return false;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Create the lock, spawn the replacement and exit this process.
    ///
    /// `args` are the replacement's arguments, without the restart-lock flag.
    pub fn release_and_restart(&self, lock_path: &Path, args: Vec<OsString>) -> Result<()> {
        let program = std::env::current_exe()?;
        let (_lock, _child) = self.hand_over(lock_path, &program, args)?;
        info!("Replacement spawned; exiting for restart");
        // The lock is released by process exit, after the child already polls for it
        std::process::exit(0);
    }

    /// Create and lock `lock_path`, then spawn `program` pointed at it.
    ///
    /// The returned lock must be held until this process is done. If the
    /// spawn fails the lock file is removed again so nothing waits on it.
    pub fn hand_over(
        &self,
        lock_path: &Path,
        program: &Path,
        args: Vec<OsString>,
    ) -> Result<(RestartLock, Child)> {
        let lock = RestartLock::create(lock_path)?;
        match lock.spawn_replacement(program, args) {
            Ok(child) => Ok((lock, child)),
            Err(e) => {
                let path = lock.path().to_path_buf();
                drop(lock);
                if let Err(remove) = std::fs::remove_file(&path) {
                    warn!("Failed to remove restart lock {}: {}", path.display(), remove);
                }
                Err(e)
            }
        }
    }
}

/// Returns true when the lock file no longer exists after this probe.
fn try_take(lock_path: &Path) -> bool {
    if !lock_path.exists() {
        return true;
    }

    let file = match std::fs::OpenOptions::new().read(true).write(true).open(lock_path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
        Err(e) => {
            trace!("Restart lock not openable yet: {}", e);
            return false;
        }
    };

    if file.try_lock_exclusive().is_err() {
        return false;
    }
    // Close before deleting; some platforms refuse to delete open files
    drop(file);

    match std::fs::remove_file(lock_path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            trace!("Restart lock not deletable yet: {}", e);
            false
        }
    }
}

/// The exiting instance's side of the hand-over. Its presence is the lock.
#[derive(Debug)]
pub struct RestartLock {
    path: PathBuf,
    // NOTE(lifetime): exclusive lock held until this value or the process goes away
    _file: File,
}

impl RestartLock {
    /// Create and lock `path`. Must happen before the replacement is spawned.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::restart_lock(format!("failed to create lock: {}", e)))?;
        file.try_lock_exclusive()
            .map_err(|e| Error::restart_lock(format!("failed to lock: {}", e)))?;

        Ok(Self {
            path: path.to_path_buf(),
            _file: file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Arguments for the replacement: `args` followed by the restart-lock flag.
    pub fn replacement_args(&self, args: Vec<OsString>) -> Vec<OsString> {
        let mut out: Vec<OsString> = args
            .into_iter()
            .scan(false, |skip_next, arg| {
                if *skip_next {
                    *skip_next = false;
                    return Some(None);
                }
                if arg == RESTART_LOCK_FLAG {
                    *skip_next = true;
                    return Some(None);
                }
                Some(Some(arg))
            })
            .flatten()
            .collect();
        out.push(RESTART_LOCK_FLAG.into());
        out.push(self.path.clone().into_os_string());
        out
    }

    /// Spawn `program` as the replacement process.
    pub fn spawn_replacement(&self, program: &Path, args: Vec<OsString>) -> Result<Child> {
        let args = self.replacement_args(args);
        info!("Spawning replacement {} {:?}", program.display(), args);
        Command::new(program)
            .args(&args)
            .spawn()
            .map_err(|e| Error::restart_lock(format!("failed to spawn replacement: {}", e)))
    }
}
