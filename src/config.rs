//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and key has a default, so an empty file is a valid
//! configuration.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{FlightTrackerError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub packet: PacketConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device path; empty means auto-detect a USB serial adapter
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

/// Flight detection thresholds
#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    #[serde(default = "default_start_speed")]
    pub start_speed: f64,

    #[serde(default = "default_end_speed")]
    pub end_speed: f64,

    #[serde(default = "default_start_confirm_s")]
    pub start_confirm_s: f64,

    #[serde(default = "default_end_confirm_s")]
    pub end_confirm_s: f64,
}

/// Frame decoding options
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PacketConfig {
    #[serde(default)]
    pub verify_checksum: bool,
}

/// Session database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

/// Live update configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LiveConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; empty means stdout only
    #[serde(default)]
    pub dir: String,
}

// Default value functions
fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_reconnect_interval_ms() -> u64 { 2000 }

fn default_start_speed() -> f64 { 5.0 }
fn default_end_speed() -> f64 { 2.0 }
fn default_start_confirm_s() -> f64 { 5.0 }
fn default_end_confirm_s() -> f64 { 30.0 }

fn default_db_path() -> String { "flights.db".to_string() }

fn default_channel_capacity() -> usize { 64 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            start_speed: default_start_speed(),
            end_speed: default_end_speed(),
            start_confirm_s: default_start_confirm_s(),
            end_confirm_s: default_end_confirm_s(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { channel_capacity: default_channel_capacity() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: String::new(),
        }
    }
}

/// Longest accepted confirmation window (one day)
const MAX_CONFIRM_S: f64 = 86_400.0;

fn invalid(message: impl std::fmt::Display) -> FlightTrackerError {
    FlightTrackerError::Config(toml::de::Error::custom(message))
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
    /// use flight_tracker::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
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
        // Serial
        if ![9600, 57600, 115200, 230400, 460800, 921600].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 57600, 115200, 230400, 460800, 921600",
            ));
        }

        if self.serial.timeout_ms == 0 || self.serial.timeout_ms > 10000 {
            return Err(invalid("timeout_ms must be between 1 and 10000"));
        }

        if self.serial.reconnect_interval_ms == 0 || self.serial.reconnect_interval_ms > 60000 {
            return Err(invalid("reconnect_interval_ms must be between 1 and 60000"));
        }

        // Detector
        for (name, value) in [
            ("start_speed", self.detector.start_speed),
            ("end_speed", self.detector.end_speed),
            ("start_confirm_s", self.detector.start_confirm_s),
            ("end_confirm_s", self.detector.end_confirm_s),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{} must be a non-negative number", name)));
            }
        }

        for (name, value) in [
            ("start_confirm_s", self.detector.start_confirm_s),
            ("end_confirm_s", self.detector.end_confirm_s),
        ] {
            if value > MAX_CONFIRM_S {
                return Err(invalid(format!(
                    "{} must not exceed {} seconds",
                    name, MAX_CONFIRM_S
                )));
            }
        }

        if self.detector.end_speed > self.detector.start_speed {
            return Err(invalid("end_speed must not exceed start_speed"));
        }

        // Storage
        if self.storage.db_path.is_empty() {
            return Err(invalid("db_path cannot be empty"));
        }

        // Live
        if self.live.channel_capacity == 0 || self.live.channel_capacity > 4096 {
            return Err(invalid("channel_capacity must be between 1 and 4096"));
        }

        // Logging
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "log level must be one of: trace, debug, info, warn, error",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.serial.port.is_empty());
        assert!(!config.packet.verify_checksum);
        assert!(config.logging.dir.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.detector.end_confirm_s, 30.0);
        assert_eq!(config.storage.db_path, "flights.db");
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyUSB0"
baud_rate = 57600

[detector]
start_speed = 8.0
end_confirm_s = 20.0

[packet]
verify_checksum = true

[storage]
db_path = "/tmp/flights.db"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial.timeout_ms, 1000);
        assert_eq!(config.detector.start_speed, 8.0);
        assert_eq!(config.detector.end_speed, 2.0);
        assert_eq!(config.detector.end_confirm_s, 20.0);
        assert!(config.packet.verify_checksum);
        assert_eq!(config.storage.db_path, "/tmp/flights.db");
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("/nonexistent/flight-tracker.toml");
        assert!(matches!(result, Err(FlightTrackerError::Io(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Config::from_toml("[serial\nport = 1");
        assert!(matches!(result, Err(FlightTrackerError::Config(_))));
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = Config::default();
        config.serial.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_baud_rates() {
        for &baud in &[9600, 57600, 115200, 230400, 460800, 921600] {
            let mut config = Config::default();
            config.serial.baud_rate = baud;
            assert!(config.validate().is_ok(), "Baud rate {} should be valid", baud);
        }
    }

    #[test]
    fn test_timeout_ms_zero() {
        let mut config = Config::default();
        config.serial.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timeout_ms_too_high() {
        let mut config = Config::default();
        config.serial.timeout_ms = 10001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_interval_zero() {
        let mut config = Config::default();
        config.serial.reconnect_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reconnect_interval_too_high() {
        let mut config = Config::default();
        config.serial.reconnect_interval_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_speed() {
        let mut config = Config::default();
        config.detector.end_speed = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_confirm() {
        let mut config = Config::default();
        config.detector.start_confirm_s = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detector.end_confirm_s = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_confirm_window_upper_bound() {
        let err = Config::from_toml("[detector]\nstart_confirm_s = 1e20\n").unwrap_err();
        assert!(err.to_string().contains("start_confirm_s"));

        let mut config = Config::default();
        config.detector.end_confirm_s = MAX_CONFIRM_S + 1.0;
        assert!(config.validate().is_err());

        config.detector.end_confirm_s = MAX_CONFIRM_S;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_end_speed_above_start_speed() {
        let mut config = Config::default();
        config.detector.start_speed = 3.0;
        config.detector.end_speed = 4.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_equal_speeds_allowed() {
        let mut config = Config::default();
        config.detector.start_speed = 3.0;
        config.detector.end_speed = 3.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_confirm_allowed() {
        let mut config = Config::default();
        config.detector.start_confirm_s = 0.0;
        config.detector.end_confirm_s = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_db_path() {
        let mut config = Config::default();
        config.storage.db_path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_capacity_bounds() {
        let mut config = Config::default();
        config.live.channel_capacity = 0;
        assert!(config.validate().is_err());

        config.live.channel_capacity = 4097;
        assert!(config.validate().is_err());

        config.live.channel_capacity = 4096;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_baud_rate(), 115200);
        assert_eq!(default_timeout_ms(), 1000);
        assert_eq!(default_reconnect_interval_ms(), 2000);
        assert_eq!(default_start_speed(), 5.0);
        assert_eq!(default_end_speed(), 2.0);
        assert_eq!(default_start_confirm_s(), 5.0);
        assert_eq!(default_end_confirm_s(), 30.0);
        assert_eq!(default_db_path(), "flights.db");
        assert_eq!(default_channel_capacity(), 64);
        assert_eq!(default_log_level(), "info");
    }
}
