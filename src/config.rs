//! TOML configuration file handling
//!
//! A missing config file means defaults; a malformed file is fatal at
//! startup. The settings overlay persists changes back through [`save`].

use crate::error::{Result, SmiError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Refresh cadence, timezone and language
    #[serde(default)]
    pub general: GeneralConfig,
    /// Presentation side effects
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// `[general]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Main refresh interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// IANA timezone for aggregation and display
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Presentation locale
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timezone: default_timezone(),
            language: default_language(),
        }
    }
}

/// `[notifications]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Whether transient banners are shown
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether the terminal bell rings on notifications
    #[serde(default = "default_true")]
    pub bell: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bell: true,
        }
    }
}

fn default_interval() -> u64 {
    10
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

/// Default config file location: `~/.config/claude-smi/config.toml`
pub fn default_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".config").join("claude-smi").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Default session log root: `~/.claude/projects`
pub fn default_data_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".claude").join("projects"),
        None => PathBuf::from(".claude").join("projects"),
    }
}

/// Load configuration from `path`. A missing file yields defaults.
pub fn load(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(path)?;
    toml::from_str(&contents)
        .map_err(|e| SmiError::Config(format!("decode {}: {e}", path.display())))
}

/// Persist configuration to `path`, creating parent directories as needed.
pub fn save(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(config)
        .map_err(|e| SmiError::Config(format!("encode config: {e}")))?;
    std::fs::write(path, contents)?;
    Ok(())
}
