//! Installed bundles: manifests, discovery, runtime hooks and lifecycle

pub mod discovery;
pub mod lifecycle;
pub mod manifest;
pub mod runtime;

pub use discovery::{DiscoveredBundle, DiscoverySource};
pub use lifecycle::{
    BundleEvent, BundleLifecycleManager, InstalledBundle, LoadReport, Progress, UninstallOutcome,
    UnmetPrompt,
};
pub use manifest::{read_manifest, BundleManifest, BUNDLE_EXTENSION};
pub use runtime::{BundleRuntime, ProcessRuntime};
