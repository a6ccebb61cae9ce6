//! Where Lucero keeps its files.
//!
//! Config lives under the platform config directory and everything else
//! (conversation store, logs) under the platform data directory, both in a
//! `lucero/` subdirectory. `LUCERO_CONFIG_DIR` and `LUCERO_DATA_DIR` replace
//! the whole path when set, which is how tests and portable installs point
//! Lucero elsewhere.

use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "lucero";

fn resolve(override_dir: Option<OsString>, platform_dir: Option<PathBuf>) -> PathBuf {
    match (override_dir, platform_dir) {
        (Some(dir), _) => PathBuf::from(dir),
        (None, Some(base)) => base.join(APP_DIR),
        // No home directory (bare containers, some service accounts).
        (None, None) => std::env::temp_dir().join(APP_DIR),
    }
}

/// Root for the conversation store and logs.
#[must_use]
pub fn data_dir() -> PathBuf {
    resolve(std::env::var_os("LUCERO_DATA_DIR"), dirs::data_dir())
}

/// Directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    resolve(std::env::var_os("LUCERO_CONFIG_DIR"), dirs::config_dir())
}

/// Daily rolling log files.
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}
