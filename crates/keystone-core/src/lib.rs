//! # keystone-core - Core Domain Types
//!
//! Foundation crate for Keystone. Provides domain types, error handling,
//! launch arguments, the versioning gate and storage-root resolution.
//!
//! This crate has **zero internal dependencies**.
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`BundleRole`] - Closed set of bundle roles, one per startup phase
//! - [`RunningState`] - Per-bundle running state owned by the lifecycle manager
//! - [`OpenQueueEntry`] - A pending "open this" request
//!
//! ### Launch (`launch`)
//! - [`LaunchArguments`] - Immutable parsed command line
//! - [`FeatureFlags`] - Diagnostic switches carried by the launch arguments
//! - [`ExitStatus`] - Process exit statuses
//!
//! ### Versioning (`versioning`)
//! - [`VersionRequirement`], [`check()`](versioning::check), [`GateOutcome`]
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`

pub mod error;
pub mod launch;
pub mod logging;
pub mod storage;
pub mod types;
pub mod versioning;

/// Prelude for common imports used throughout all Keystone crates
pub mod prelude {
    pub use super::error::{Error, Result};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result};
pub use launch::{
    parse_plugin_test_list, ExitStatus, FeatureFlags, LaunchArguments, BUILD_NUMBER,
    MIN_RUNTIME_VERSION,
};
pub use types::{BundleId, BundleRole, OpenQueueEntry, RunningState};
pub use versioning::{GateOutcome, Unmet, VersionRequirement};
