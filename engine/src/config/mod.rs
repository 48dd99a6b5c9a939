//! Configuration management for Station Sync

mod settings;

pub use settings::*;

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("station-sync")
}

/// Get the configuration file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load configuration from the default location or create it
pub fn load_or_create_default() -> Result<Settings> {
    load_or_create(&config_path())
}

/// Load configuration from `path`, writing defaults there if it is missing
pub fn load_or_create(path: &Path) -> Result<Settings> {
    if path.exists() {
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    } else {
        let settings = Settings::default();
        save_to(&settings, path)?;
        Ok(settings)
    }
}

/// Save configuration to `path`
pub fn save_to(settings: &Settings, path: &Path) -> Result<()> {
    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(settings)?;
    fs::write(path, content)?;

    Ok(())
}
