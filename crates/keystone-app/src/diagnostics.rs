//! Environment diagnostics and the UI runtime version check

use keystone_core::prelude::*;
use keystone_core::{BUILD_NUMBER, MIN_RUNTIME_VERSION};

/// Recommended minimum of available memory
pub const MEMORY_FLOOR_BYTES: u64 = 1024 * 1024 * 1024;

/// Log host details. Warns (never fails) when memory is below the floor.
pub fn log_environment() {
    info!(
        "Keystone build {} on {} ({}), {} CPU(s)",
        BUILD_NUMBER,
        std::env::consts::OS,
        std::env::consts::ARCH,
        num_cpus::get()
    );
    match available_memory() {
        Some(bytes) => {
            info!("Available memory: {} MiB", bytes / (1024 * 1024));
            if bytes < MEMORY_FLOOR_BYTES {
                warn!(
                    "Available memory ({} MiB) is below the recommended {} MiB",
                    bytes / (1024 * 1024),
                    MEMORY_FLOOR_BYTES / (1024 * 1024)
                );
            }
        }
        None => info!("Available memory: unknown"),
    }
}

/// Available memory in bytes, when the platform reports it
pub fn available_memory() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&meminfo)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// `MemAvailable` from `/proc/meminfo` content, in bytes
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(content: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib * 1024)
}

/// Fail when the UI runtime is older than [`MIN_RUNTIME_VERSION`].
///
/// An unknown version passes with a warning.
pub fn check_runtime(found: Option<(u32, u32)>) -> Result<()> {
    let Some(found) = found else {
        warn!("UI runtime version unknown; skipping compatibility check");
        return Ok(());
    };
    if found < MIN_RUNTIME_VERSION {
        return Err(Error::UnsupportedRuntime {
            found: format!("{}.{}", found.0, found.1),
            required: format!("{}.{}", MIN_RUNTIME_VERSION.0, MIN_RUNTIME_VERSION.1),
        });
    }
    debug!("UI runtime {}.{} ok", found.0, found.1);
    Ok(())
}
