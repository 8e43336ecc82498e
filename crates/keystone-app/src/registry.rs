//! Read-only game data registry
//!
//! Filled during startup (baseline data, then extension bundles) and locked
//! before plugin bundles load. Lookups are allowed at any time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use keystone_core::prelude::*;

#[derive(Debug, Default)]
pub struct GameDataRegistry {
    entries: RwLock<BTreeMap<String, toml::Value>>,
    locked: AtomicBool,
}

impl GameDataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: toml::Value) -> Result<()> {
        let key = key.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Checked under the write lock so no insert lands after `lock()` returns
        if self.is_locked() {
            return Err(Error::RegistryLocked { key });
        }
        entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<toml::Value> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject all further inserts
    pub fn lock(&self) {
        let entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !self.locked.swap(true, Ordering::AcqRel) {
            info!("Game data registry locked with {} entries", entries.len());
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Load every `*.toml` file in `dir`. Each top-level key of `<stem>.toml`
    /// becomes the entry `<stem>/<key>`. A missing directory loads nothing.
    pub fn load_baseline(&self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for path in toml_files(dir)? {
            let stem = file_stem(&path);
            let content = std::fs::read_to_string(&path)?;
            let table: toml::Table = toml::from_str(&content).map_err(|e| {
                Error::background_init("baseline", format!("{}: {}", path.display(), e))
            })?;
            for (key, value) in table {
                self.insert(format!("{}/{}", stem, key), value)?;
                loaded += 1;
            }
        }
        debug!("Loaded {} baseline game data entries from {:?}", loaded, dir);
        Ok(loaded)
    }
}

/// Core resource ids installed with the host: the stems of `<dir>/*.toml`
pub fn core_resources(dir: &Path) -> BTreeSet<String> {
    match toml_files(dir) {
        Ok(files) => files.iter().map(|p| file_stem(p)).collect(),
        Err(e) => {
            warn!("Failed to list core resources in {:?}: {}", dir, e);
            BTreeSet::new()
        }
    }
}

fn toml_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_insert_rejected_after_lock() {
        let registry = GameDataRegistry::new();
        registry.insert("units/knight", toml::Value::Integer(3)).unwrap();
        registry.lock();
        assert!(registry.is_locked());
        let err = registry
            .insert("units/archer", toml::Value::Integer(2))
            .unwrap_err();
        assert!(matches!(err, Error::RegistryLocked { ref key } if key == "units/archer"));
        assert_eq!(registry.get("units/knight"), Some(toml::Value::Integer(3)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_load_baseline_prefixes_keys_with_file_stem() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("units.toml"), "knight = 3\narcher = 2\n").unwrap();
        std::fs::write(dir.path().join("terrain.toml"), "[forest]\ncost = 2\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = GameDataRegistry::new();
        assert_eq!(registry.load_baseline(dir.path()).unwrap(), 3);
        assert_eq!(registry.get("units/knight"), Some(toml::Value::Integer(3)));
        assert!(registry.get("terrain/forest").is_some());
    }

    #[test]
    fn test_load_baseline_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let registry = GameDataRegistry::new();
        assert_eq!(registry.load_baseline(&dir.path().join("nope")).unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalid_baseline_is_background_init_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.toml"), "= nope").unwrap();
        let err = GameDataRegistry::new().load_baseline(dir.path()).unwrap_err();
        assert!(matches!(err, Error::BackgroundInit { .. }));
    }

    #[test]
    fn test_core_resources_are_file_stems() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("units.toml"), "").unwrap();
        std::fs::write(dir.path().join("maps.toml"), "").unwrap();
        let found = core_resources(dir.path());
        assert_eq!(
            found.into_iter().collect::<Vec<_>>(),
            vec!["maps".to_string(), "units".to_string()]
        );
    }
}
