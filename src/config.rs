//! # Configuration Management
//!
//! Centralized configuration for the protocol server.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - `CRAFTWIRE_*` environment overrides via `from_env()`
//!
//! ## Sections
//! - `server`: listen address, MOTD, player cap, keep-alive timing
//! - `protocol`: supported protocol range and the default locale
//! - `transport`: compression and frame limits
//! - `logging`: subscriber setup
//! - `settings`: `namespace -> name -> value` tables seeding the settings store

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::chat::locale::is_locale_tag;
use crate::core::codec::MAX_FRAME_LENGTH;
use crate::error::{ProtocolError, Result};
use crate::service::context::SettingValue;
use crate::utils::compression::MAX_DECOMPRESSION_SIZE;
use crate::utils::timeout;

/// Oldest protocol the bundled packet table speaks (1.8)
pub const MIN_PROTOCOL: i32 = 47;

/// Newest protocol the bundled packet table speaks (1.12.2)
pub const MAX_PROTOCOL: i32 = 340;

/// Default vanilla compression threshold
pub const DEFAULT_COMPRESSION_THRESHOLD: i32 = 256;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CraftwireConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Initial values for the settings store
    #[serde(default)]
    pub settings: BTreeMap<String, BTreeMap<String, SettingValue>>,
}

impl CraftwireConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with `CRAFTWIRE_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CRAFTWIRE_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(motd) = std::env::var("CRAFTWIRE_MOTD") {
            config.server.motd = motd;
        }

        if let Ok(max) = std::env::var("CRAFTWIRE_MAX_PLAYERS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_players = val;
            }
        }

        if let Ok(online) = std::env::var("CRAFTWIRE_ONLINE_MODE") {
            if let Ok(val) = online.parse::<bool>() {
                config.server.online_mode = val;
            }
        }

        if let Ok(interval) = std::env::var("CRAFTWIRE_KEEPALIVE_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.server.keepalive_interval = Duration::from_millis(val);
            }
        }

        if let Ok(threshold) = std::env::var("CRAFTWIRE_COMPRESSION_THRESHOLD") {
            if let Ok(val) = threshold.parse::<i32>() {
                config.transport.compression_threshold = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.protocol.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());

        for namespace in self.settings.keys() {
            if namespace.is_empty() {
                errors.push("Settings namespace cannot be empty".to_string());
            }
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:25565")
    pub address: String,

    /// Message of the day shown in the server list
    pub motd: String,

    /// Player cap reported in status responses
    pub max_players: usize,

    /// Whether logins go through the encryption handshake
    pub online_mode: bool,

    /// Interval between keep-alives to play-state connections
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// Unacknowledged keep-alive age that disconnects a connection
    #[serde(with = "duration_serde")]
    pub keepalive_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("0.0.0.0:25565"),
            motd: String::from("A Craftwire Server"),
            max_players: 20,
            online_mode: false,
            keepalive_interval: timeout::KEEPALIVE_INTERVAL,
            keepalive_timeout: timeout::KEEPALIVE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            max_connections: 1000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:25565')",
                self.address
            ));
        }

        if self.motd.chars().count() > 256 {
            errors.push("MOTD too long (maximum: 256 characters)".to_string());
        }

        if self.max_players > i32::MAX as usize {
            errors.push(format!("Max players too large: {}", self.max_players));
        }

        if self.keepalive_interval.as_millis() < 100 {
            errors.push("Keep-alive interval too short (minimum: 100ms)".to_string());
        } else if self.keepalive_interval.as_secs() > 3600 {
            errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
        }

        if self.keepalive_timeout <= self.keepalive_interval {
            errors.push(format!(
                "Keep-alive timeout ({}ms) must exceed the keep-alive interval ({}ms)",
                self.keepalive_timeout.as_millis(),
                self.keepalive_interval.as_millis()
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        errors
    }
}

/// Supported protocol range and text defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Version name reported in status responses
    pub version_name: String,

    /// Oldest accepted protocol version
    pub min_protocol: i32,

    /// Newest accepted protocol version
    pub max_protocol: i32,

    /// Locale used until a client reports its own
    pub default_locale: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version_name: String::from("1.8-1.12.2"),
            min_protocol: MIN_PROTOCOL,
            max_protocol: MAX_PROTOCOL,
            default_locale: String::from("en_us"),
        }
    }
}

impl ProtocolConfig {
    /// Whether a client speaking `version` may log in
    pub fn supports(&self, version: i32) -> bool {
        (self.min_protocol..=self.max_protocol).contains(&version)
    }

    /// Validate protocol configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.version_name.is_empty() {
            errors.push("Version name cannot be empty".to_string());
        }

        if self.min_protocol < 0 {
            errors.push(format!("Minimum protocol cannot be negative: {}", self.min_protocol));
        }

        if self.min_protocol > self.max_protocol {
            errors.push(format!(
                "Minimum protocol {} is above maximum protocol {}",
                self.min_protocol, self.max_protocol
            ));
        }

        if !is_locale_tag(&self.default_locale) {
            errors.push(format!(
                "Invalid default locale: '{}' (expected form: 'en_us')",
                self.default_locale
            ));
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Payloads longer than this are deflated; negative disables compression
    pub compression_threshold: i32,

    /// zlib level 0-9
    pub compression_level: u32,

    /// Largest accepted frame body
    pub max_frame_length: usize,

    /// Largest accepted inflated payload
    pub max_uncompressed_length: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_level: 6,
            max_frame_length: MAX_FRAME_LENGTH,
            max_uncompressed_length: MAX_DECOMPRESSION_SIZE,
        }
    }
}

impl TransportConfig {
    /// Threshold to announce at login, if compression is on
    pub fn threshold(&self) -> Option<usize> {
        usize::try_from(self.compression_threshold).ok()
    }

    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.compression_level > 9 {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 0-9)",
                self.compression_level
            ));
        }

        if self.max_frame_length == 0 {
            errors.push("Max frame length cannot be 0".to_string());
        } else if self.max_frame_length > MAX_FRAME_LENGTH {
            errors.push(format!(
                "Max frame length too large: {} bytes (protocol maximum: {MAX_FRAME_LENGTH})",
                self.max_frame_length
            ));
        }

        if self.max_uncompressed_length < self.max_frame_length {
            errors.push(
                "Max uncompressed length cannot be smaller than max frame length".to_string(),
            );
        }

        if let Some(threshold) = self.threshold() {
            if threshold > self.max_frame_length {
                errors.push(
                    "Compression threshold cannot be larger than max frame length".to_string(),
                );
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("craftwire"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Durations as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_ascii_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(CraftwireConfig::default().validate().is_empty());
    }

    #[test]
    fn negative_threshold_disables_compression() {
        let config = CraftwireConfig::default_with_overrides(|c| c.transport.compression_threshold = -1);
        assert_eq!(config.transport.threshold(), None);
        assert_eq!(CraftwireConfig::default().transport.threshold(), Some(256));
    }

    #[test]
    fn timeout_must_exceed_interval() {
        let config = CraftwireConfig::default_with_overrides(|c| {
            c.server.keepalive_timeout = c.server.keepalive_interval;
        });
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn settings_tables_parse() {
        let config = CraftwireConfig::from_toml(
            r#"
            [server]
            motd = "Hello"

            [settings.world]
            render_distance = 4
            name = "overworld"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.motd, "Hello");
        assert_eq!(config.server.max_players, 20);
        assert_eq!(
            config.settings["world"]["render_distance"],
            SettingValue::Int(4)
        );
    }
}
