//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/evaveo/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/evaveo/` (~/.config/evaveo/)
//! - State/Logs: `$XDG_STATE_HOME/evaveo/` (~/.local/state/evaveo/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collector endpoint used when no `api_url` is configured
pub const DEFAULT_API_URL: &str = "https://api.vrmanager.evaveo.com/api/tracking";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// SDK identity and switches
    #[serde(default)]
    pub sdk: SdkConfig,

    /// HTTP delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Periodic performance snapshots
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SDK identity configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SdkConfig {
    /// API key issued by EVAVEO VR Manager (format: "vr_xxxx")
    pub api_key: Option<String>,

    /// Collector base URL; events are posted to `{api_url}/sdk/event`
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Start with tracking enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Application name reported with `session_start`
    pub app_name: Option<String>,

    /// Log every delivery at debug level instead of trace
    #[serde(default)]
    pub debug_logs: bool,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            enabled: true,
            app_name: None,
            debug_logs: false,
        }
    }
}

impl SdkConfig {
    /// Config with the given key and everything else defaulted
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.api_key.as_deref() {
            None => Err(Error::Config("sdk.api_key is required".to_string())),
            Some(key) if key.trim().is_empty() => {
                Err(Error::Config("sdk.api_key cannot be empty".to_string()))
            }
            Some(_) => {
                if self.api_url.trim().is_empty() {
                    return Err(Error::Config("sdk.api_url cannot be empty".to_string()));
                }
                Ok(())
            }
        }
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }
}

/// HTTP delivery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// HTTP request timeout in seconds
    #[serde(default = "default_delivery_timeout")]
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_delivery_timeout(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Performance monitor configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    /// Start the monitor on initialization
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between snapshots
    #[serde(default = "default_performance_interval")]
    pub interval_secs: f64,

    /// Include frame rate in snapshots
    #[serde(default = "default_true")]
    pub track_fps: bool,

    /// Include battery level in snapshots
    #[serde(default = "default_true")]
    pub track_battery: bool,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_performance_interval(),
            track_fps: true,
            track_battery: true,
        }
    }
}

impl PerformanceConfig {
    /// Sampling interval, clamped to at least 100ms
    pub fn interval(&self) -> Duration {
        let secs = if self.interval_secs.is_finite() {
            self.interval_secs.max(0.1)
        } else {
            default_performance_interval()
        };
        Duration::from_secs_f64(secs)
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write human-readable logs to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stderr: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_delivery_timeout() -> u64 {
    30
}

fn default_performance_interval() -> f64 {
    5.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/evaveo/config.toml` (~/.config/evaveo/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("evaveo").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/evaveo/` (~/.local/state/evaveo/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("evaveo")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/evaveo/evaveo.log` (~/.local/state/evaveo/evaveo.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("evaveo.log")
    }
}
