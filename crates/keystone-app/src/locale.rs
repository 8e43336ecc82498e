//! UI and game-data locale selection
//!
//! Precedence: command line, then the persisted setting, then the `LANG`
//! language prefix, then `en`.

use keystone_core::prelude::*;
use keystone_core::LaunchArguments;

use crate::config::{keys, SettingsStore};

pub const FALLBACK_LOCALE: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locales {
    pub ui: String,
    pub game: String,
}

/// Pick both locales and persist the UI locale.
///
/// `lang_env` is the value of `LANG` (e.g. `de_DE.UTF-8`).
pub fn select_locales(
    args: &LaunchArguments,
    settings: &SettingsStore,
    lang_env: Option<&str>,
) -> Locales {
    let from_env = lang_env.and_then(language_prefix);

    let ui = args
        .ui_locale
        .clone()
        .or_else(|| settings.get(keys::UI_LOCALE))
        .or_else(|| from_env.clone())
        .unwrap_or_else(|| FALLBACK_LOCALE.to_string());

    let game = args
        .game_locale
        .clone()
        .or_else(|| settings.get(keys::GAME_LOCALE))
        .unwrap_or_else(|| ui.clone());

    settings.set(keys::UI_LOCALE, ui.clone());
    info!("Locale: ui={}, game={}", ui, game);
    Locales { ui, game }
}

/// `de_DE.UTF-8` -> `de`. `C` and `POSIX` carry no language.
fn language_prefix(lang: &str) -> Option<String> {
    let prefix = lang
        .split(['_', '.', '@'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if prefix.is_empty() || prefix == "c" || prefix == "posix" {
        None
    } else {
        Some(prefix)
    }
}
