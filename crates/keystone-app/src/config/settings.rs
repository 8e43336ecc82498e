//! User settings store persisted as `settings.toml` in the user storage root
//!
//! Settings are a flat string map. Keys are stable; see [`keys`](super::keys).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use keystone_core::prelude::*;

pub const SETTINGS_FILENAME: &str = "settings.toml";

/// On-disk layout
#[derive(Debug, Default, Deserialize, Serialize)]
struct SettingsFile {
    #[serde(default)]
    values: BTreeMap<String, String>,
}

/// Thread-safe key/value settings.
///
/// Mutations stay in memory until [`SettingsStore::save`].
#[derive(Debug)]
pub struct SettingsStore {
    path: Option<PathBuf>,
    values: Mutex<BTreeMap<String, String>>,
}

impl SettingsStore {
    /// Load settings from `<root>/settings.toml`
    ///
    /// Returns an empty store if the file doesn't exist or can't be parsed.
    pub fn load(root: &Path) -> Self {
        let path = root.join(SETTINGS_FILENAME);
        let values = read_values(&path);
        Self {
            path: Some(path),
            values: Mutex::new(values),
        }
    }

    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: Mutex::new(BTreeMap::new()),
        }
    }

    fn values(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.values().remove(key)
    }

    /// Remove every key starting with `prefix`
    pub fn remove_prefixed(&self, prefix: &str) {
        self.values().retain(|k, _| !k.starts_with(prefix));
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref() {
            Some("true") => true,
            Some("false") => false,
            Some(other) => {
                warn!("Setting {} has non-boolean value {:?}", key, other);
                default
            }
            None => default,
        }
    }

    pub fn set_bool(&self, key: impl Into<String>, value: bool) {
        self.set(key, if value { "true" } else { "false" });
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Seed keys the user file doesn't set. Existing values are kept.
    pub fn apply_defaults(&self, defaults: &[(&str, &str)]) {
        let mut values = self.values();
        for (key, value) in defaults {
            values
                .entry((*key).to_string())
                .or_insert_with(|| (*value).to_string());
        }
    }

    /// Persist to disk.
    ///
    /// Uses atomic write (temp file + rename) while holding an exclusive lock on
    /// a sidecar lock file, so two processes never interleave writes.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path
            .parent()
            .ok_or_else(|| Error::settings("settings path has no parent directory"))?;
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::settings(format!("Failed to create {}: {}", dir.display(), e)))?;

        let content = {
            let file = SettingsFile {
                values: self.values().clone(),
            };
            toml::to_string_pretty(&file)
                .map_err(|e| Error::settings(format!("Failed to serialize settings: {}", e)))?
        };
        let full_content = format!("# Keystone user settings\n\n{}", content);

        let lock = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(".settings.lock"))
            .map_err(|e| Error::settings(format!("Failed to open settings lock: {}", e)))?;
        lock.lock_exclusive()
            .map_err(|e| Error::settings(format!("Failed to lock settings: {}", e)))?;

        let temp_path = dir.join(".settings.toml.tmp");
        std::fs::write(&temp_path, full_content)
            .map_err(|e| Error::settings(format!("Failed to write temp file: {}", e)))?;
        std::fs::rename(&temp_path, path)
            .map_err(|e| Error::settings(format!("Failed to rename temp file: {}", e)))?;

        // Lock is released when `lock` is dropped
        debug!("Saved settings to {:?}", path);
        Ok(())
    }
}

fn read_values(path: &Path) -> BTreeMap<String, String> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return BTreeMap::new();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str::<SettingsFile>(&content) {
            Ok(file) => {
                debug!("Loaded {} setting(s) from {:?}", file.values.len(), path);
                file.values
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                BTreeMap::new()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            BTreeMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_is_empty() {
        let temp = tempdir().unwrap();
        let store = SettingsStore::load(temp.path());
        assert_eq!(store.get("instance.single"), None);
        assert!(store.get_bool("instance.single", true));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = tempdir().unwrap();
        let store = SettingsStore::load(temp.path());
        store.set("locale.ui", "de");
        store.set_bool("bundle.1234.enabled", false);
        store.save().unwrap();

        let reloaded = SettingsStore::load(temp.path());
        assert_eq!(reloaded.get("locale.ui").as_deref(), Some("de"));
        assert!(!reloaded.get_bool("bundle.1234.enabled", true));
        assert!(!temp.path().join(".settings.toml.tmp").exists());
    }

    #[test]
    fn test_invalid_file_falls_back_to_empty() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(SETTINGS_FILENAME), "values = [[[").unwrap();
        let store = SettingsStore::load(temp.path());
        assert_eq!(store.get("anything"), None);
    }

    #[test]
    fn test_apply_defaults_keeps_user_values() {
        let store = SettingsStore::in_memory();
        store.set("instance.single", "false");
        store.apply_defaults(&[("instance.single", "true"), ("locale.ui", "en")]);
        assert!(!store.get_bool("instance.single", true));
        assert_eq!(store.get("locale.ui").as_deref(), Some("en"));
    }

    #[test]
    fn test_non_boolean_value_uses_default() {
        let store = SettingsStore::in_memory();
        store.set("instance.single", "maybe");
        assert!(store.get_bool("instance.single", true));
        assert!(!store.get_bool("instance.single", false));
    }

    #[test]
    fn test_remove_prefixed() {
        let store = SettingsStore::in_memory();
        store.set("deletion.0.path", "/a");
        store.set("deletion.count", "1");
        store.set("locale.ui", "en");
        store.remove_prefixed("deletion.");
        assert_eq!(store.get("deletion.count"), None);
        assert_eq!(store.get("locale.ui").as_deref(), Some("en"));
    }

    #[test]
    fn test_in_memory_save_is_noop() {
        let store = SettingsStore::in_memory();
        store.set("a", "b");
        assert!(store.save().is_ok());
    }
}
