//! Log file setup
//!
//! Daily-rotated files under the log directory. The directory sits
//! next to the user storage when `KEYSTONE_USER_STORAGE` is set, otherwise in
//! the platform data directory. Logging starts before the storage root is
//! resolved, so the two are looked up independently.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};
use crate::storage::STORAGE_ENV;

/// Environment variable read when `--loglevel` is absent
pub const LOG_ENV: &str = "KEYSTONE_LOG";

const DEFAULT_DIRECTIVE: &str = "keystone=info,warn";
const LOG_FILE_PREFIX: &str = "keystone.log";

/// Install the global subscriber and return the log directory.
///
/// ```bash
/// KEYSTONE_LOG=debug keystone
/// keystone --loglevel keystone_app=trace
/// ```
pub fn init(level: Option<&str>) -> Result<PathBuf> {
    let directory = log_directory(
        std::env::var_os(STORAGE_ENV).map(PathBuf::from),
        dirs::data_local_dir(),
    );
    std::fs::create_dir_all(&directory)?;

    let directive = select_directive(level, std::env::var(LOG_ENV).ok());
    let appender = RollingFileAppender::new(Rotation::DAILY, &directory, LOG_FILE_PREFIX);

    tracing_subscriber::registry()
        .with(EnvFilter::new(&directive))
        .with(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| Error::startup(format!("logging already initialised: {}", e)))?;

    tracing::info!(
        build = crate::launch::BUILD_NUMBER,
        filter = %directive,
        "Keystone starting; logging to {}",
        directory.display()
    );
    Ok(directory)
}

/// First parseable directive of `--loglevel`, `KEYSTONE_LOG`, the default.
fn select_directive(cli: Option<&str>, env: Option<String>) -> String {
    if let Some(cli) = cli {
        if EnvFilter::try_new(cli).is_ok() {
            return cli.to_string();
        }
        eprintln!("Ignoring invalid --loglevel {:?}", cli);
    }
    env.filter(|d| EnvFilter::try_new(d).is_ok())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}

fn log_directory(storage_override: Option<PathBuf>, data_dir: Option<PathBuf>) -> PathBuf {
    match storage_override {
        Some(storage) => storage.join("logs"),
        None => data_dir
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keystone")
            .join("logs"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_directive_wins() {
        let chosen = select_directive(Some("keystone_app=trace"), Some("debug".into()));
        assert_eq!(chosen, "keystone_app=trace");
    }

    #[test]
    fn test_invalid_directives_fall_through() {
        assert_eq!(select_directive(Some("keystone=loud"), Some("debug".into())), "debug");
        assert_eq!(select_directive(Some("keystone=loud"), Some("keystone=loud".into())), DEFAULT_DIRECTIVE);
        assert_eq!(select_directive(None, None), DEFAULT_DIRECTIVE);
    }

    #[test]
    fn test_log_directory_follows_storage_override() {
        assert_eq!(
            log_directory(Some(PathBuf::from("/srv/ks")), Some(PathBuf::from("/data"))),
            PathBuf::from("/srv/ks/logs")
        );
        assert_eq!(
            log_directory(None, Some(PathBuf::from("/data"))),
            PathBuf::from("/data/keystone/logs")
        );
    }
}
