//! # Configuration Management
//!
//! Centralized configuration for OBEX clients and servers.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Packet Lengths
//! OBEX requires every peer to accept packets of at least 255 bytes, and the
//! length field is 16 bits wide, so configured maximum packet lengths must lie
//! within `255..=65535`.

use crate::core::packet::{MAX_PACKET_LENGTH, MIN_MAX_PACKET_LENGTH, OBEX_VERSION};
use crate::error::{ObexError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::Level;

/// Connection-Id value reserved by OBEX, never issued.
pub const RESERVED_CONNECTION_ID: u32 = 0xFFFF_FFFF;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ObexConfig {
    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ObexConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ObexError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ObexError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ObexError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    ///
    /// - `OBEX_MAX_PACKET_LENGTH` sets the client and server packet limit
    /// - `OBEX_LOG_LEVEL` sets the log level
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(length) = std::env::var("OBEX_MAX_PACKET_LENGTH") {
            let length = length.parse::<u16>().map_err(|e| {
                ObexError::ConfigError(format!("Invalid OBEX_MAX_PACKET_LENGTH '{length}': {e}"))
            })?;
            config.client.max_packet_length = length;
            config.server.max_packet_length = length;
        }

        if let Ok(level) = std::env::var("OBEX_LOG_LEVEL") {
            config.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| ObexError::ConfigError(format!("Invalid OBEX_LOG_LEVEL '{level}'")))?;
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
            .map_err(|e| ObexError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ObexError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.server.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ObexError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn validate_packet_length(owner: &str, length: u16, errors: &mut Vec<String>) {
    if length < MIN_MAX_PACKET_LENGTH {
        errors.push(format!(
            "{owner} max packet length too small: {length} (minimum: {MIN_MAX_PACKET_LENGTH})"
        ));
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Largest packet this client is willing to receive, sent in Connect
    pub max_packet_length: u16,

    /// Protocol version byte sent in Connect
    pub obex_version: u8,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_packet_length: MAX_PACKET_LENGTH,
            obex_version: OBEX_VERSION,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_packet_length("Client", self.max_packet_length, &mut errors);

        if self.obex_version >> 4 != OBEX_VERSION >> 4 {
            errors.push(format!(
                "Unsupported OBEX version: 0x{:02X} (major version must be 1)",
                self.obex_version
            ));
        }

        errors
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Largest packet this server is willing to receive, sent in the
    /// Connect response
    pub max_packet_length: u16,

    /// Connection-Id handed to the client on a successful connect
    pub connection_id: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_packet_length: MAX_PACKET_LENGTH,
            connection_id: None,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_packet_length("Server", self.max_packet_length, &mut errors);

        if self.connection_id == Some(RESERVED_CONNECTION_ID) {
            errors.push(format!(
                "Connection-Id 0x{RESERVED_CONNECTION_ID:08X} is reserved"
            ));
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

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("obex-protocol"),
            log_level: Level::INFO,
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

        errors
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
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
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
