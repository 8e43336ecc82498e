//! User storage and install locations
//!
//! The user storage root holds settings, user bundles, the instance rendezvous
//! files and everything the deletion queue may remove.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Environment variable overriding the user storage root
pub const STORAGE_ENV: &str = "KEYSTONE_USER_STORAGE";

/// Environment variable overriding the install root
pub const INSTALL_ENV: &str = "KEYSTONE_INSTALL_DIR";

const APP_DIR: &str = "keystone";
const PROBE_FILE: &str = ".keystone-probe";

/// Resolve the user storage root.
///
/// Order: `$KEYSTONE_USER_STORAGE`, the platform data directory, then the temp
/// directory. Each fallback is logged. Fails only if none can be written.
pub fn resolve_user_storage() -> Result<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = std::env::var_os(STORAGE_ENV).filter(|v| !v.is_empty()) {
        candidates.push(("environment override", PathBuf::from(dir)));
    }
    if let Some(base) = dirs::data_local_dir() {
        candidates.push(("platform default", base.join(APP_DIR)));
    }
    candidates.push(("temp directory", std::env::temp_dir().join(APP_DIR)));

    resolve_from(&candidates)
}

/// Pick the first usable candidate.
pub fn resolve_from(candidates: &[(&str, PathBuf)]) -> Result<PathBuf> {
    let mut last_tried = PathBuf::new();
    for (i, (label, dir)) in candidates.iter().enumerate() {
        match ensure_usable(dir) {
            Ok(()) => {
                if i > 0 {
                    warn!("Using {} for user storage: {}", label, dir.display());
                } else {
                    debug!("User storage ({}): {}", label, dir.display());
                }
                return Ok(dir.clone());
            }
            Err(e) => {
                warn!("Unusable user storage ({}) {}: {}", label, dir.display(), e);
                last_tried = dir.clone();
            }
        }
    }
    Err(Error::StorageUnavailable { last_tried })
}

/// Create `dir` if needed and check it is writable.
fn ensure_usable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(PROBE_FILE);
    std::fs::write(&probe, b"")?;
    std::fs::remove_file(&probe)
}

/// Directory holding system bundles and baseline game data.
pub fn install_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(INSTALL_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Whether `path` lies inside `root` once symlinks and `..` are resolved.
pub fn is_within(root: &Path, path: &Path) -> bool {
    resolve_within(root, path).is_some()
}

/// Resolve `path` and return it only if it lies strictly inside `root`.
///
/// Both sides go through [`resolve_path`], so a symlink under `root` that
/// points elsewhere does not count as inside. Relative paths are rejected.
pub fn resolve_within(root: &Path, path: &Path) -> Option<PathBuf> {
    if !path.is_absolute() {
        return None;
    }
    let root = resolve_path(root);
    let path = resolve_path(path);
    (path != root && path.starts_with(&root)).then_some(path)
}

/// Canonical form of a path that may not exist yet.
///
/// `.` and `..` are folded lexically, then the deepest existing ancestor is
/// canonicalized (following symlinks) and the missing tail is re-appended.
pub fn resolve_path(path: &Path) -> PathBuf {
    let lexical = normalize(path);
    let mut existing = lexical.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return tail
                .iter()
                .rev()
                .fold(canonical, |acc, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return lexical,
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
