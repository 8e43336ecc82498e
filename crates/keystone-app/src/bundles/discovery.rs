//! Finding installed bundles

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use keystone_core::prelude::*;

use super::manifest::{is_bundle_file, read_manifest, BundleManifest};

/// Where bundles come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoverySource {
    /// Scan each directory in order (non-recursive)
    Directories(Vec<PathBuf>),
    /// Exactly these files (`--plugintest`)
    PluginTest(Vec<PathBuf>),
}

/// A manifest together with the file it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredBundle {
    pub path: PathBuf,
    pub manifest: BundleManifest,
}

impl DiscoverySource {
    /// Install bundles first, then user bundles
    pub fn standard(install_root: &Path, storage_root: &Path) -> Self {
        DiscoverySource::Directories(vec![
            install_root.join("bundles"),
            storage_root.join("bundles"),
        ])
    }

    pub fn is_plugin_test(&self) -> bool {
        matches!(self, DiscoverySource::PluginTest(_))
    }

    /// Read every bundle manifest from this source.
    ///
    /// Invalid manifests and duplicate ids are skipped with a warning; the
    /// first bundle seen with a given id wins.
    pub fn discover(&self) -> Vec<DiscoveredBundle> {
        let candidates = match self {
            DiscoverySource::Directories(dirs) => dirs.iter().flat_map(|d| scan_dir(d)).collect(),
            DiscoverySource::PluginTest(files) => files.clone(),
        };

        let mut seen = HashSet::new();
        let mut found = Vec::new();
        for path in candidates {
            let manifest = match read_manifest(&path) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping bundle: {}", e);
                    continue;
                }
            };
            if !seen.insert(manifest.id) {
                warn!(
                    "Ignoring {}: bundle id {} already installed",
                    path.display(),
                    manifest.id
                );
                continue;
            }
            trace!("Discovered {} bundle {} at {}", manifest.role, manifest.name, path.display());
            found.push(DiscoveredBundle { path, manifest });
        }
        debug!("Discovered {} bundle(s)", found.len());
        found
    }
}

fn scan_dir(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Failed to read bundle directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_bundle_file(p))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_bundle(dir: &Path, file: &str, id: &str, name: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(file);
        std::fs::write(
            &path,
            format!("id = \"{id}\"\nname = \"{name}\"\nrole = \"plugin\"\n"),
        )
        .unwrap();
        path
    }

    const A: &str = "00000000-0000-4000-8000-00000000000a";
    const B: &str = "00000000-0000-4000-8000-00000000000b";

    #[test]
    fn test_scan_order_and_dedup() {
        let temp = tempdir().unwrap();
        let install = temp.path().join("install");
        let storage = temp.path().join("storage");
        write_bundle(&install.join("bundles"), "b.bundle", B, "Bravo");
        write_bundle(&install.join("bundles"), "a.bundle", A, "Alpha");
        write_bundle(&storage.join("bundles"), "dup.bundle", A, "Shadow");
        std::fs::write(storage.join("bundles").join("readme.txt"), "x").unwrap();

        let found = DiscoverySource::standard(&install, &storage).discover();
        let names: Vec<_> = found.iter().map(|b| b.manifest.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Bravo"]);
    }

    #[test]
    fn test_invalid_manifest_is_skipped() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("bundles");
        write_bundle(&dir, "good.bundle", A, "Good");
        std::fs::write(dir.join("bad.bundle"), "not toml [").unwrap();

        let found = DiscoverySource::Directories(vec![dir]).discover();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_plugin_test_uses_exact_files() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("bundles");
        write_bundle(&dir, "a.bundle", A, "Alpha");
        let only = write_bundle(&temp.path().join("elsewhere"), "b.bundle", B, "Bravo");

        let source = DiscoverySource::PluginTest(vec![only.clone()]);
        assert!(source.is_plugin_test());
        let found = source.discover();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, only);
    }

    #[test]
    fn test_missing_directories_are_empty() {
        let temp = tempdir().unwrap();
        let found = DiscoverySource::Directories(vec![temp.path().join("missing")]).discover();
        assert!(found.is_empty());
    }
}
