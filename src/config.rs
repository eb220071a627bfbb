//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TelemetryError};

/// Log levels accepted in configuration
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

/// Sliding window configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WindowConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

/// Consumer (render loop) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    #[serde(default = "default_status_interval_s")]
    pub status_interval_s: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files; empty logs to the console only
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 38400 }
fn default_timeout_ms() -> u64 { 15 }
fn default_settle_ms() -> u64 { 2000 }

fn default_capacity() -> usize { 1000 }

fn default_refresh_interval_ms() -> u64 { 50 }
fn default_status_interval_s() -> u64 { 5 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { capacity: default_capacity() }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_refresh_interval_ms(),
            status_interval_s: default_status_interval_s(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

/// Parameters for one connection, fixed for its lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub device_path: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    /// Wait after opening before input is trusted
    pub settle_interval: Duration,
}

impl ConnectionConfig {
    /// Connection with default timeout and settling interval
    pub fn new(device_path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            device_path: device_path.into(),
            baud_rate,
            read_timeout: Duration::from_millis(default_timeout_ms()),
            settle_interval: Duration::from_millis(default_settle_ms()),
        }
    }
}

impl SerialConfig {
    /// Connection parameters for this serial section
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            device_path: self.port.clone(),
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.timeout_ms),
            settle_interval: Duration::from_millis(self.settle_ms),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pendulum_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        // Rates the driver cannot set surface as a connection error at open
        if self.serial.baud_rate == 0 {
            return Err(invalid("baud_rate must be non-zero"));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 1000 {
            return Err(invalid("timeout_ms must be between 1 and 1000"));
        }

        if self.serial.settle_ms > 10000 {
            return Err(invalid("settle_ms must be between 0 and 10000"));
        }

        if self.window.capacity == 0 || self.window.capacity > 1_000_000 {
            return Err(invalid("window capacity must be between 1 and 1000000"));
        }

        if self.display.refresh_interval_ms == 0 || self.display.refresh_interval_ms > 1000 {
            return Err(invalid("refresh_interval_ms must be between 1 and 1000"));
        }

        if self.display.status_interval_s == 0 || self.display.status_interval_s > 3600 {
            return Err(invalid("status_interval_s must be between 1 and 3600"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "log level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(msg))
}
