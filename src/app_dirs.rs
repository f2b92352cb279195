//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate locations.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/quill/` | `~/.local/share/quill/` |
//! | Config | `~/Library/Application Support/quill/` | `~/.config/quill/` |
//!
//! # Environment Overrides
//!
//! - `QUILL_DATA_DIR` overrides [`data_dir`]
//! - `QUILL_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

/// Application data root: logs and other generated files.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("QUILL_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("quill"))
        .unwrap_or_else(|| PathBuf::from("/tmp/quill-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("QUILL_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("quill"))
        .unwrap_or_else(|| PathBuf::from("/tmp/quill-config"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default style template directory (`config_dir()/modelfiles/`).
#[must_use]
pub fn templates_dir() -> PathBuf {
    config_dir().join("modelfiles")
}
