//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load the TOML configuration
//! shared by the producer and consumer roles.
//!
//! # Usage
//!
//! ```rust,no_run
//! use syncshm_common::config::{ConfigLoader, ConfigError, HandshakeConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = HandshakeConfig::load(Path::new("syncshm.toml"))?;
//!     config.validate()?;
//!     println!("Segment: {}", config.segment.name);
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_CREATE_ATTEMPTS, DEFAULT_DATA_TIMEOUT_MS, DEFAULT_OPEN_BACKOFF_MS,
    DEFAULT_PREPARE_DELAY_MS, DEFAULT_SEGMENT_NAME, MAX_PAYLOAD_LEN, MAX_SEGMENT_NAME_LEN,
    REFERENCE_MESSAGE,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields shared by every SyncShm process.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "syncshm-demo"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "syncshm".to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identity of the shared segment, agreed upon by both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SegmentConfig {
    /// Name in the POSIX shm namespace, with or without the leading `/`.
    pub name: String,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SEGMENT_NAME.to_string(),
        }
    }
}

/// Producer role settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProducerConfig {
    /// Payload written into the message buffer.
    pub message: String,
    /// Simulated preparation latency before publishing.
    pub prepare_delay_ms: u64,
    /// Remove+create attempts before a name collision is fatal.
    pub create_attempts: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            message: REFERENCE_MESSAGE.to_string(),
            prepare_delay_ms: DEFAULT_PREPARE_DELAY_MS,
            create_attempts: DEFAULT_CREATE_ATTEMPTS,
        }
    }
}

impl ProducerConfig {
    /// Preparation latency as a `Duration`.
    pub fn prepare_delay(&self) -> Duration {
        Duration::from_millis(self.prepare_delay_ms)
    }
}

/// Consumer role settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Sleep between failed open attempts.
    pub open_backoff_ms: u64,
    /// Give up after this many failed open attempts. Unbounded when absent.
    pub max_open_attempts: Option<u32>,
    /// Bound on the wait for the readiness flag. Indefinite when absent or 0.
    pub data_timeout_ms: Option<u64>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            open_backoff_ms: DEFAULT_OPEN_BACKOFF_MS,
            max_open_attempts: None,
            data_timeout_ms: Some(DEFAULT_DATA_TIMEOUT_MS),
        }
    }
}

impl ConsumerConfig {
    /// Open-retry backoff as a `Duration`.
    pub fn open_backoff(&self) -> Duration {
        Duration::from_millis(self.open_backoff_ms)
    }

    /// Data wait bound as a `Duration`, `None` meaning wait forever.
    pub fn data_timeout(&self) -> Option<Duration> {
        self.data_timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }
}

/// Complete configuration of one handshake run.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "info"
///
/// [segment]
/// name = "SyncShm"
///
/// [producer]
/// message = "Hello from producer!"
/// prepare_delay_ms = 2000
///
/// [consumer]
/// open_backoff_ms = 500
/// data_timeout_ms = 30000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Common fields.
    pub shared: SharedConfig,
    /// Segment identity.
    pub segment: SegmentConfig,
    /// Producer role.
    pub producer: ProducerConfig,
    /// Consumer role.
    pub consumer: ConsumerConfig,
}

impl HandshakeConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `shared.service_name` is empty
    /// - `segment.name` is empty, too long, or has a `/` past the leading one
    /// - `producer.message` does not fit the message buffer or holds a NUL
    /// - `producer.create_attempts` is zero
    /// - `consumer.open_backoff_ms` is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let name = self.segment.name.strip_prefix('/').unwrap_or(&self.segment.name);
        if name.is_empty() {
            return Err(ConfigError::ValidationError(
                "segment.name cannot be empty".to_string(),
            ));
        }
        if name.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "segment.name '{}' must not contain '/' after the leading one",
                self.segment.name
            )));
        }
        if name.len() + 1 > MAX_SEGMENT_NAME_LEN {
            return Err(ConfigError::ValidationError(format!(
                "segment.name is {} bytes, limit is {}",
                name.len(),
                MAX_SEGMENT_NAME_LEN - 1
            )));
        }

        if self.producer.message.len() > MAX_PAYLOAD_LEN {
            return Err(ConfigError::ValidationError(format!(
                "producer.message is {} bytes, limit is {}",
                self.producer.message.len(),
                MAX_PAYLOAD_LEN
            )));
        }
        if self.producer.message.contains('\0') {
            return Err(ConfigError::ValidationError(
                "producer.message must not contain NUL".to_string(),
            ));
        }
        if self.producer.create_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "producer.create_attempts must be at least 1".to_string(),
            ));
        }

        if self.consumer.open_backoff_ms == 0 {
            return Err(ConfigError::ValidationError(
                "consumer.open_backoff_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"trace\"")
                .unwrap()
                .level,
            LogLevel::Trace
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"warn\"")
                .unwrap()
                .level,
            LogLevel::Warn
        );
        assert!(toml::from_str::<TestWrapper>("level = \"loud\"").is_err());
    }

    #[test]
    fn test_log_level_to_tracing_level() {
        assert_eq!(tracing::Level::from(LogLevel::Debug), tracing::Level::DEBUG);
        assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_default_handshake_config_is_valid() {
        let config = HandshakeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.segment.name, DEFAULT_SEGMENT_NAME);
        assert_eq!(config.producer.message, REFERENCE_MESSAGE);
        assert_eq!(config.consumer.open_backoff(), Duration::from_millis(500));
        assert_eq!(
            config.consumer.data_timeout(),
            Some(Duration::from_millis(DEFAULT_DATA_TIMEOUT_MS))
        );
    }

    #[test]
    fn test_segment_name_validation() {
        let mut config = HandshakeConfig::default();

        config.segment.name = "/SyncShm".to_string();
        assert!(config.validate().is_ok());

        config.segment.name = "/".to_string();
        assert!(config.validate().is_err());

        config.segment.name = "a/b".to_string();
        assert!(config.validate().is_err());

        config.segment.name = "x".repeat(MAX_SEGMENT_NAME_LEN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_message_validation() {
        let mut config = HandshakeConfig::default();

        config.producer.message = "m".repeat(MAX_PAYLOAD_LEN);
        assert!(config.validate().is_ok());

        config.producer.message = "m".repeat(MAX_PAYLOAD_LEN + 1);
        assert!(config.validate().is_err());

        config.producer.message = "nul\0inside".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_data_timeout_means_indefinite() {
        let config = ConsumerConfig {
            data_timeout_ms: Some(0),
            ..ConsumerConfig::default()
        };
        assert_eq!(config.data_timeout(), None);
    }

    #[test]
    fn test_zero_backoff_rejected() {
        let mut config = HandshakeConfig::default();
        config.consumer.open_backoff_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = HandshakeConfig::load(Path::new("/nonexistent/path/syncshm.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = HandshakeConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_config_loader_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[segment]
name = "PartialShm"

[consumer]
open_backoff_ms = 50
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = HandshakeConfig::load(file.path()).unwrap();
        assert_eq!(config.segment.name, "PartialShm");
        assert_eq!(config.consumer.open_backoff_ms, 50);
        assert_eq!(config.consumer.max_open_attempts, None);
        assert_eq!(config.producer, ProducerConfig::default());
        assert_eq!(config.shared.log_level, LogLevel::Info);
    }
}
