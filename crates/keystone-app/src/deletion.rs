//! Paths to delete at the next startup
//!
//! Used to finish uninstalling bundles whose files were in use. Entries live in
//! the settings store under indexed keys (`deletion.<n>.path`,
//! `deletion.<n>.retry`, `deletion.count`) and must point inside the user
//! storage root. Paths are stored resolved, and resolved again before anything
//! is removed, so a symlink planted under the root cannot redirect a delete.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keystone_core::prelude::*;
use keystone_core::storage::{resolve_path, resolve_within};

use crate::config::{keys, SettingsStore};

/// One queued deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionEntry {
    pub path: PathBuf,
    /// Re-queue verbatim if the delete fails
    pub retry: bool,
}

/// Outcome of [`DeletionQueue::process_pending`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub deleted: Vec<PathBuf>,
    pub requeued: Vec<PathBuf>,
    pub dropped: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DeletionQueue {
    settings: Arc<SettingsStore>,
    root: PathBuf,
}

impl DeletionQueue {
    pub fn new(settings: Arc<SettingsStore>, root: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            root: root.into(),
        }
    }

    /// Queue `path` for deletion at the next startup and persist the list.
    pub fn mark(&self, path: &Path, retry: bool) -> Result<()> {
        let Some(resolved) = resolve_within(&self.root, path) else {
            return Err(Error::OutsideStorageRoot {
                path: path.to_path_buf(),
            });
        };

        let mut entries = self.entries();
        if entries.iter().any(|e| resolve_path(&e.path) == resolved) {
            debug!("{} already queued for deletion", path.display());
            return Ok(());
        }
        entries.push(DeletionEntry {
            path: resolved,
            retry,
        });
        self.write_entries(&entries);
        info!("Queued {} for deletion at next startup", path.display());
        self.settings.save()
    }

    /// Paths queued and not yet processed, in resolved form
    pub fn pending(&self) -> HashSet<PathBuf> {
        self.entries()
            .iter()
            .map(|e| resolve_path(&e.path))
            .collect()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.pending().contains(&resolve_path(path))
    }

    /// Attempt every queued deletion exactly once.
    ///
    /// Each entry is removed from the list whatever the result; failed entries
    /// with `retry` are re-queued verbatim, others are dropped.
    pub fn process_pending(&self) -> DeletionReport {
        let entries = self.entries();
        let mut report = DeletionReport::default();
        if entries.is_empty() {
            return report;
        }

        let mut requeue = Vec::new();
        for entry in entries {
            let Some(target) = resolve_within(&self.root, &entry.path) else {
                warn!(
                    "Dropping deletion outside user storage: {}",
                    entry.path.display()
                );
                report.dropped.push(entry.path);
                continue;
            };

            match delete_path(&target) {
                Ok(()) => {
                    info!("Deleted {}", target.display());
                    report.deleted.push(entry.path);
                }
                Err(e) if entry.retry => {
                    warn!("Failed to delete {} ({}); will retry", entry.path.display(), e);
                    report.requeued.push(entry.path.clone());
                    requeue.push(entry);
                }
                Err(e) => {
                    warn!("Failed to delete {}: {}", entry.path.display(), e);
                    report.dropped.push(entry.path);
                }
            }
        }

        self.write_entries(&requeue);
        if let Err(e) = self.settings.save() {
            warn!("Failed to persist deletion queue: {}", e);
        }
        report
    }

    fn entries(&self) -> Vec<DeletionEntry> {
        let count = self.settings.get_usize(keys::DELETION_COUNT).unwrap_or(0);
        (0..count)
            .filter_map(|i| {
                let path = self.settings.get(&keys::deletion_path(i))?;
                Some(DeletionEntry {
                    path: PathBuf::from(path),
                    retry: self.settings.get_bool(&keys::deletion_retry(i), false),
                })
            })
            .collect()
    }

    fn write_entries(&self, entries: &[DeletionEntry]) {
        self.settings.remove_prefixed(keys::DELETION_PREFIX);
        if entries.is_empty() {
            return;
        }
        for (i, entry) in entries.iter().enumerate() {
            self.settings
                .set(keys::deletion_path(i), entry.path.to_string_lossy());
            self.settings.set_bool(keys::deletion_retry(i), entry.retry);
        }
        self.settings
            .set(keys::DELETION_COUNT, entries.len().to_string());
    }
}

/// Delete a file or directory tree. A missing path counts as deleted.
fn delete_path(path: &Path) -> std::io::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
