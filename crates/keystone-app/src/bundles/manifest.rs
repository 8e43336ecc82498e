//! `.bundle` manifest files
//!
//! ```toml
//! id = "0b4f6a52-3f4c-4c0e-9d6b-1b1e5c2f7a10"
//! name = "Map Tools"
//! role = "plugin"
//! min_build = 3000
//! requires = ["units", "terrain"]
//! entry = "bin/map-tools"
//! args = ["--quiet"]
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use keystone_core::prelude::*;
use keystone_core::{BundleId, BundleRole, VersionRequirement};

/// File extension of bundle manifests
pub const BUNDLE_EXTENSION: &str = "bundle";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleManifest {
    pub id: BundleId,
    pub name: String,
    pub role: BundleRole,
    #[serde(default)]
    pub min_build: Option<u32>,
    #[serde(default)]
    pub requires: BTreeSet<String>,
    /// Program to launch, relative to the manifest's directory
    #[serde(default)]
    pub entry: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl BundleManifest {
    pub fn requirement(&self) -> VersionRequirement {
        VersionRequirement {
            min_build: self.min_build,
            requires: self.requires.clone(),
        }
    }
}

pub fn parse_manifest(path: &Path, content: &str) -> Result<BundleManifest> {
    let manifest: BundleManifest =
        toml::from_str(content).map_err(|e| Error::manifest(path, e.to_string()))?;
    if manifest.name.trim().is_empty() {
        return Err(Error::manifest(path, "name must not be empty"));
    }
    Ok(manifest)
}

pub fn read_manifest(path: &Path) -> Result<BundleManifest> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::manifest(path, format!("unreadable: {}", e)))?;
    parse_manifest(path, &content)
}

pub fn is_bundle_file(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == BUNDLE_EXTENSION)
}
