//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, UplinkError};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub network: NetworkConfig,
    pub ftp: FtpConfig,
    #[serde(default)]
    pub segment: SegmentConfig,
    #[serde(default)]
    pub gps: GpsConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Modem serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Cellular registration configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_apn")]
    pub apn: String,

    #[serde(default = "default_registration_poll_ms")]
    pub registration_poll_ms: u64,

    #[serde(default = "default_reset_threshold")]
    pub reset_threshold: u32,

    #[serde(default = "default_power_cycle_quiescent_ms")]
    pub power_cycle_quiescent_ms: u64,
}

/// FTP upload configuration
#[derive(Debug, Deserialize, Clone)]
pub struct FtpConfig {
    pub host: String,

    #[serde(default = "default_ftp_port")]
    pub port: u16,

    #[serde(default = "default_ftp_username")]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,

    #[serde(default = "default_put_retry_ms")]
    pub put_retry_ms: u64,
}

/// Segment capacity configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    #[serde(default = "default_max_record_len")]
    pub max_record_len: usize,
}

/// GNSS acquisition configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    #[serde(default = "default_gps_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Data file configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    pub data_file: String,

    #[serde(default = "default_heading")]
    pub heading: String,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            max_record_len: default_max_record_len(),
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_gps_poll_interval_ms(),
        }
    }
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB2".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_response_timeout_ms() -> u64 { 5000 }

fn default_apn() -> String { "hologram".to_string() }
fn default_registration_poll_ms() -> u64 { 1000 }
fn default_reset_threshold() -> u32 { 10 }
fn default_power_cycle_quiescent_ms() -> u64 { 5000 }

fn default_ftp_port() -> u16 { 21 }
fn default_ftp_username() -> String { "anonymous".to_string() }
fn default_remote_dir() -> String { "/pub/upload/".to_string() }
fn default_connect_retry_ms() -> u64 { 2000 }
fn default_put_retry_ms() -> u64 { 10000 }

fn default_max_records() -> usize { 5 }
fn default_max_record_len() -> usize { 100 }

fn default_gps_poll_interval_ms() -> u64 { 1000 }

fn default_data_dir() -> String { "./data".to_string() }
fn default_heading() -> String { "utc,latitude,longitude,altitude,speed_kph,heading".to_string() }

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
    /// use radiometer_uplink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200].contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200"));
        }

        if self.serial.response_timeout_ms == 0 || self.serial.response_timeout_ms > 120_000 {
            return Err(invalid("response_timeout_ms must be between 1 and 120000"));
        }

        if self.network.apn.is_empty() {
            return Err(invalid("apn cannot be empty"));
        }

        if self.network.registration_poll_ms == 0 || self.network.registration_poll_ms > 60_000 {
            return Err(invalid("registration_poll_ms must be between 1 and 60000"));
        }

        if self.network.reset_threshold == 0 {
            return Err(invalid("reset_threshold must be greater than 0"));
        }

        if self.network.power_cycle_quiescent_ms > 60_000 {
            return Err(invalid("power_cycle_quiescent_ms must be at most 60000"));
        }

        if self.ftp.host.is_empty() {
            return Err(invalid("ftp host cannot be empty"));
        }

        if self.ftp.port == 0 {
            return Err(invalid("ftp port must be greater than 0"));
        }

        if !self.ftp.remote_dir.starts_with('/') || !self.ftp.remote_dir.ends_with('/') {
            return Err(invalid("remote_dir must start and end with '/'"));
        }

        if self.ftp.connect_retry_ms == 0 || self.ftp.connect_retry_ms > 600_000 {
            return Err(invalid("connect_retry_ms must be between 1 and 600000"));
        }

        if self.ftp.put_retry_ms == 0 || self.ftp.put_retry_ms > 600_000 {
            return Err(invalid("put_retry_ms must be between 1 and 600000"));
        }

        if self.segment.max_records == 0 || self.segment.max_records > 100 {
            return Err(invalid("max_records must be between 1 and 100"));
        }

        // Shortest useful record is one character plus CRLF
        if self.segment.max_record_len < 3 || self.segment.max_record_len > 1024 {
            return Err(invalid("max_record_len must be between 3 and 1024"));
        }

        if self.gps.poll_interval_ms == 0 || self.gps.poll_interval_ms > 60_000 {
            return Err(invalid("gps poll_interval_ms must be between 1 and 60000"));
        }

        if self.storage.data_dir.is_empty() {
            return Err(invalid("data_dir cannot be empty"));
        }

        if crate::storage::validate_filename(&self.storage.data_file).is_err() {
            return Err(invalid(format!(
                "data_file '{}' must be an 8.3 name",
                self.storage.data_file
            )));
        }

        if matches!(&self.logging.dir, Some(dir) if dir.is_empty()) {
            return Err(invalid("logging dir cannot be empty when set"));
        }

        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.response_timeout_ms)
    }

    pub fn gps_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gps.poll_interval_ms)
    }
}

fn invalid(message: impl std::fmt::Display) -> UplinkError {
    UplinkError::Config(toml::de::Error::custom(message))
}
