//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use neerscan_core::location::DEFAULT_LOCATION_TIMEOUT;
use neerscan_core::session::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_FIRST_READING_GRACE, DEFAULT_SCAN_WINDOW,
};
use neerscan_core::{Position, SessionConfig, uuids};
use serde::{Deserialize, Serialize};

use crate::cli::ConfigKey;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default device identifier
    #[serde(default)]
    pub device: Option<String>,

    /// Disable colored output
    #[serde(default)]
    pub no_color: bool,

    /// Reading log database, instead of the platform data directory
    #[serde(default)]
    pub db_path: Option<PathBuf>,

    /// Session timing and discovery settings
    #[serde(default)]
    pub session: SessionSettings,

    /// Fixed position used to stamp readings
    #[serde(default)]
    pub location: LocationSettings,
}

/// Session settings, in seconds where they are durations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_scan_window")]
    pub scan_window_secs: u64,

    #[serde(default = "default_first_reading_grace")]
    pub first_reading_grace_secs: u64,

    #[serde(default = "default_location_timeout")]
    pub location_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Advertised name prefix that identifies a probe
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

fn default_scan_window() -> u64 {
    DEFAULT_SCAN_WINDOW.as_secs()
}

fn default_first_reading_grace() -> u64 {
    DEFAULT_FIRST_READING_GRACE.as_secs()
}

fn default_location_timeout() -> u64 {
    DEFAULT_LOCATION_TIMEOUT.as_secs()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_name_prefix() -> String {
    uuids::DEVICE_NAME_PREFIX.to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            scan_window_secs: default_scan_window(),
            first_reading_grace_secs: default_first_reading_grace(),
            location_timeout_secs: default_location_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            name_prefix: default_name_prefix(),
        }
    }
}

impl SessionSettings {
    /// Library session configuration for these settings.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .name_prefix(self.name_prefix.clone())
            .scan_window(Duration::from_secs(self.scan_window_secs))
            .first_reading_grace(Duration::from_secs(self.first_reading_grace_secs))
            .location_timeout(Duration::from_secs(self.location_timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
    }
}

/// Optional fixed coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl LocationSettings {
    /// The configured position, when both coordinates are set.
    pub fn position(&self) -> Option<Position> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Position::new(lat, lon)),
            _ => None,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neerscan")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`. Unreadable or invalid files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Set `key` from its command-line text.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            bail!("Value must not be empty; use 'config unset' to clear a key");
        }
        match key {
            ConfigKey::Device => self.device = Some(value.to_string()),
            ConfigKey::NoColor => self.no_color = parse_bool(value)?,
            ConfigKey::DbPath => self.db_path = Some(PathBuf::from(value)),
            ConfigKey::Latitude => {
                self.location.latitude = Some(parse_coordinate(value, 90.0)?);
            }
            ConfigKey::Longitude => {
                self.location.longitude = Some(parse_coordinate(value, 180.0)?);
            }
            ConfigKey::ScanWindow => self.session.scan_window_secs = parse_secs(value)?,
            ConfigKey::ConnectTimeout => self.session.connect_timeout_secs = parse_secs(value)?,
        }
        Ok(())
    }

    /// Reset `key` to its default.
    pub fn unset(&mut self, key: ConfigKey) {
        let defaults = SessionSettings::default();
        match key {
            ConfigKey::Device => self.device = None,
            ConfigKey::NoColor => self.no_color = false,
            ConfigKey::DbPath => self.db_path = None,
            ConfigKey::Latitude => self.location.latitude = None,
            ConfigKey::Longitude => self.location.longitude = None,
            ConfigKey::ScanWindow => self.session.scan_window_secs = defaults.scan_window_secs,
            ConfigKey::ConnectTimeout => {
                self.session.connect_timeout_secs = defaults.connect_timeout_secs;
            }
        }
    }

    /// Reading log database path
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(neerscan_store::default_db_path)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("Expected true or false, got '{}'", value),
    }
}

fn parse_coordinate(value: &str, limit: f64) -> Result<f64> {
    let degrees: f64 = value
        .parse()
        .with_context(|| format!("'{}' is not a number", value))?;
    if !degrees.is_finite() || degrees.abs() > limit {
        bail!("Coordinate must be between -{limit} and {limit}, got {}", value);
    }
    Ok(degrees)
}

fn parse_secs(value: &str) -> Result<u64> {
    let secs: u64 = value
        .parse()
        .with_context(|| format!("'{}' is not a whole number of seconds", value))?;
    if secs == 0 {
        bail!("Duration must be at least 1 second");
    }
    Ok(secs)
}

/// Resolve device from arg (or env var, via clap) then config.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device
        .filter(|d| !d.trim().is_empty())
        .or_else(|| config.device.clone())
}
