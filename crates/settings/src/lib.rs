//! RibbonWorm Settings
//!
//! Node configuration stored as a JSON file.
//!
//! ## Usage
//!
//! ```no_run
//! use ribbonworm_settings::Settings;
//!
//! // Load or create default settings
//! let mut settings = Settings::load_or_default()?;
//!
//! settings.client.use_proxy = false;
//!
//! settings.save()?;
//! # Ok::<(), ribbonworm_settings::SettingsError>(())
//! ```

mod config;

pub use config::{ClientSettings, DiscoverySettings, NodeSettings, RelaySettings, Settings};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Directory holding RibbonWorm configuration
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ribbonworm")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
