//! Configuration management for critboard.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "critboard";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "boards.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CRITBOARD_`)
/// 2. TOML config file at `~/.config/critboard/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Proximity clustering configuration.
    pub clustering: ClusteringConfig,
    /// Cursor presence configuration.
    pub presence: PresenceConfig,
    /// Activity event configuration.
    pub activity: ActivityConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/critboard/boards.db`
    pub database_path: Option<PathBuf>,
}

/// Clustering-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Group nearby comments into cluster markers.
    pub enabled: bool,
    /// On-screen grouping radius in pixels. Divided by zoom to get the
    /// board-space distance.
    pub threshold_px: f64,
}

/// Presence-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Interval between presence republishes while the pointer is idle.
    pub heartbeat_interval_ms: u64,
    /// Records older than this are never treated as active.
    pub liveness_window_ms: u64,
    /// Records older than this are reported offline rather than idle.
    pub idle_window_ms: u64,
}

/// Activity-event configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Events younger than this are shown.
    pub display_window_ms: u64,
    /// Events older than this are deleted by whichever client sweeps first.
    pub expiry_ms: u64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_px: 30.0,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            liveness_window_ms: 10_000,
            idle_window_ms: 60_000,
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            display_window_ms: 5_000,
            expiry_ms: 4_800,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("CRITBOARD_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.clustering.threshold_px;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(Error::ConfigValidation {
                message: format!("threshold_px must be finite and non-negative, got {threshold}"),
            });
        }

        let presence = &self.presence;
        if presence.heartbeat_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "heartbeat_interval_ms must be greater than 0".to_string(),
            });
        }
        if presence.heartbeat_interval_ms >= presence.liveness_window_ms {
            return Err(Error::ConfigValidation {
                message: format!(
                    "heartbeat_interval_ms ({}) must be shorter than liveness_window_ms ({})",
                    presence.heartbeat_interval_ms, presence.liveness_window_ms
                ),
            });
        }
        if presence.liveness_window_ms > presence.idle_window_ms {
            return Err(Error::ConfigValidation {
                message: format!(
                    "liveness_window_ms ({}) cannot be greater than idle_window_ms ({})",
                    presence.liveness_window_ms, presence.idle_window_ms
                ),
            });
        }

        let activity = &self.activity;
        if activity.expiry_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "expiry_ms must be greater than 0".to_string(),
            });
        }
        if activity.expiry_ms > activity.display_window_ms {
            return Err(Error::ConfigValidation {
                message: format!(
                    "expiry_ms ({}) cannot be greater than display_window_ms ({})",
                    activity.expiry_ms, activity.display_window_ms
                ),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}

impl PresenceConfig {
    /// Get the heartbeat interval as a Duration.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Get the liveness window as a Duration.
    #[must_use]
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    /// Get the idle window as a Duration.
    #[must_use]
    pub fn idle_window(&self) -> Duration {
        Duration::from_millis(self.idle_window_ms)
    }
}

impl ActivityConfig {
    /// Get the display window as a Duration.
    #[must_use]
    pub fn display_window(&self) -> Duration {
        Duration::from_millis(self.display_window_ms)
    }

    /// Get the expiry age as a Duration.
    #[must_use]
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }
}
