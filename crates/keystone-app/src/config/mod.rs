//! Persisted user settings
//!
//! - `settings.toml` in the user storage root, flat string keys
//! - Global defaults seeded at startup without overriding user values

pub mod settings;

pub use settings::{SettingsStore, SETTINGS_FILENAME};

/// Stable setting keys
pub mod keys {
    use keystone_core::BundleId;

    /// Limit to a single running instance
    pub const SINGLE_INSTANCE: &str = "instance.single";
    pub const UI_LOCALE: &str = "locale.ui";
    pub const GAME_LOCALE: &str = "locale.game";
    pub const WINDOW_LAYOUT: &str = "window.layout";

    pub const DELETION_PREFIX: &str = "deletion.";
    pub const DELETION_COUNT: &str = "deletion.count";

    pub fn deletion_path(index: usize) -> String {
        format!("deletion.{}.path", index)
    }

    pub fn deletion_retry(index: usize) -> String {
        format!("deletion.{}.retry", index)
    }

    pub fn bundle_enabled(id: &BundleId) -> String {
        format!("bundle.{}.enabled", id)
    }
}

/// Global defaults applied on every startup
pub const DEFAULTS: &[(&str, &str)] = &[(keys::SINGLE_INSTANCE, "true")];
