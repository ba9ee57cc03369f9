//! Configuration management for the KnxFtp client.
//!
//! Configurations are named TOML files under `~/.config/knxftp/`. A run
//! selects one with `--config <name>`; a missing named file falls back to
//! `default.toml`, and a missing `default.toml` is created from the built-in
//! defaults.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::IndividualAddress;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the configuration used when no other is selected.
pub const DEFAULT_CONFIG_NAME: &str = "default";

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("package_size must be between 16 and 65535, got {0}")]
    InvalidPackageSize(usize),

    #[error("port must not be 0")]
    InvalidPort,

    #[error("gateway must be an IPv4 address, got {0}")]
    InvalidGateway(String),

    #[error("{field} must be an individual address like 1.1.255, got {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("device_timeout_secs must be between 1 and 600, got {0}")]
    InvalidDeviceTimeout(u64),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// How the client reaches the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    /// KNXnet/IP tunneling through a gateway.
    #[default]
    Tunneling,
    /// KNXnet/IP routing (multicast).
    Routing,
    /// In-memory device, no bus access.
    Virtual,
}

/// Main configuration structure of the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Bus and device addressing.
    pub connection: ConnectionConfig,

    /// File transfer tuning.
    pub transfer: TransferConfig,

    /// Logging.
    pub log: LogConfig,
}

/// Bus and device addressing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub kind: ConnectionKind,

    /// IPv4 address of the KNXnet/IP gateway.
    pub gateway: String,

    /// UDP port of the gateway.
    pub port: u16,

    /// Individual address of the gateway.
    pub gateway_address: String,

    /// Source address for routing. Derived from the gateway address if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,

    /// Individual address of the target device.
    pub device_address: String,
}

/// File transfer tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferConfig {
    /// Requested package size in bytes; the device may reduce it.
    pub package_size: usize,

    /// Pause between packages in milliseconds.
    pub package_delay_ms: u64,

    /// Timeout for binding the device session.
    pub device_timeout_secs: u64,

    /// Continue interrupted uploads when the device supports it.
    pub resume: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: ConnectionKind::default(),
            gateway: "192.168.178.2".to_string(),
            port: 3671,
            gateway_address: "1.1.0".to_string(),
            source_address: None,
            device_address: "1.1.255".to_string(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            package_size: 128,
            package_delay_ms: 0,
            device_timeout_secs: 4,
            resume: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ConnectionConfig {
    /// Parsed address of the target device.
    pub fn device_address(&self) -> Result<IndividualAddress, ConfigError> {
        parse_address("device_address", &self.device_address)
    }

    /// Parsed address of the gateway.
    pub fn gateway_address(&self) -> Result<IndividualAddress, ConfigError> {
        parse_address("gateway_address", &self.gateway_address)
    }

    /// Source address for routing, derived from the gateway when unset.
    pub fn source_address(&self) -> Result<IndividualAddress, ConfigError> {
        match &self.source_address {
            Some(source) => parse_address("source_address", source),
            None => Ok(IndividualAddress::routing_source_for(&self.gateway_address()?)),
        }
    }
}

impl TransferConfig {
    pub fn package_delay(&self) -> Duration {
        Duration::from_millis(self.package_delay_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }
}

fn parse_address(field: &'static str, value: &str) -> Result<IndividualAddress, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Returns the directory holding the named configurations.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("knxftp")
}

/// Returns the file path of a named configuration.
pub fn named_config_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.toml"))
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - KNXFTP_GATEWAY: Override the gateway IP address
    /// - KNXFTP_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(gateway) = std::env::var("KNXFTP_GATEWAY") {
            if !gateway.is_empty() {
                tracing::info!("Overriding gateway from environment: {}", gateway);
                self.connection.gateway = gateway;
            }
        }

        if let Ok(level) = std::env::var("KNXFTP_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.log.level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let package_size = self.transfer.package_size;
        if !(16..=65535).contains(&package_size) {
            return Err(ConfigError::InvalidPackageSize(package_size));
        }

        if self.connection.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.connection.kind != ConnectionKind::Virtual
            && self.connection.gateway.parse::<Ipv4Addr>().is_err()
        {
            return Err(ConfigError::InvalidGateway(self.connection.gateway.clone()));
        }

        self.connection.device_address()?;
        self.connection.gateway_address()?;
        self.connection.source_address()?;

        let timeout = self.transfer.device_timeout_secs;
        if !(1..=600).contains(&timeout) {
            return Err(ConfigError::InvalidDeviceTimeout(timeout));
        }

        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load a named configuration from `dir`.
    ///
    /// A missing named file falls back to the default configuration file
    /// once. A missing default file is written from the built-in defaults.
    pub fn load_named(dir: &Path, name: &str) -> Result<Self> {
        let path = named_config_path(dir, name);
        if path.exists() {
            return Self::load(&path);
        }

        let default_path = named_config_path(dir, DEFAULT_CONFIG_NAME);
        if default_path.exists() {
            tracing::debug!("Config {:?} not found, falling back to {:?}", name, DEFAULT_CONFIG_NAME);
            return Self::load(&default_path);
        }

        let config = Self::default();
        config.persisted().save(&default_path)?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// The part of the configuration stored back after a run.
    ///
    /// Connection and transfer settings are remembered; the log level is
    /// left at its default so a `--verbose` run does not stick.
    pub fn persisted(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            transfer: self.transfer.clone(),
            log: LogConfig::default(),
        }
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.connection.kind, ConnectionKind::Tunneling);
        assert_eq!(config.connection.gateway, "192.168.178.2");
        assert_eq!(config.connection.port, 3671);
        assert_eq!(config.connection.device_address, "1.1.255");
        assert_eq!(config.transfer.package_size, 128);
        assert_eq!(config.transfer.device_timeout_secs, 4);
        assert!(config.transfer.resume);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[connection]
kind = "routing"
device_address = "1.2.3"

[transfer]
package_size = 64
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.connection.kind, ConnectionKind::Routing);
        assert_eq!(config.connection.device_address, "1.2.3");
        assert_eq!(config.transfer.package_size, 64);
        // Other values should be defaults
        assert_eq!(config.connection.port, 3671);
        assert!(config.transfer.resume);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[connection
kind = "routing"
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_unknown_kind() {
        let toml = r#"
[connection]
kind = "carrier-pigeon"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.connection.kind = ConnectionKind::Virtual;
        original.connection.source_address = Some("1.0.7".to_string());
        original.transfer.package_delay_ms = 25;
        original.transfer.resume = false;

        let toml = original.to_toml().unwrap();
        let loaded = Config::from_toml(&toml).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_persisted_drops_log_level() {
        let mut config = Config::default();
        config.log.level = "trace".to_string();
        config.transfer.package_size = 200;

        let persisted = config.persisted();
        assert_eq!(persisted.log, LogConfig::default());
        assert_eq!(persisted.transfer.package_size, 200);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_named_existing() {
        let temp_dir = TempDir::new().unwrap();
        let mut named = Config::default();
        named.transfer.package_size = 64;
        named.save(named_config_path(temp_dir.path(), "lab")).unwrap();

        let loaded = Config::load_named(temp_dir.path(), "lab").unwrap();
        assert_eq!(loaded.transfer.package_size, 64);
    }

    #[test]
    fn test_load_named_falls_back_to_default() {
        let temp_dir = TempDir::new().unwrap();
        let mut default = Config::default();
        default.connection.port = 3700;
        default
            .save(named_config_path(temp_dir.path(), DEFAULT_CONFIG_NAME))
            .unwrap();

        let loaded = Config::load_named(temp_dir.path(), "missing").unwrap();
        assert_eq!(loaded.connection.port, 3700);
    }

    #[test]
    fn test_load_named_creates_default() {
        let temp_dir = TempDir::new().unwrap();

        let loaded = Config::load_named(temp_dir.path(), "missing").unwrap();
        assert_eq!(loaded, Config::default());
        assert!(named_config_path(temp_dir.path(), DEFAULT_CONFIG_NAME).exists());
        assert!(!named_config_path(temp_dir.path(), "missing").exists());
    }

    #[test]
    fn test_save_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("dirs").join("config.toml");

        Config::default().save(&config_path).unwrap();

        assert!(config_path.exists());
    }

    #[test]
    fn test_source_address_derived_from_gateway() {
        let mut config = ConnectionConfig::default();
        config.gateway_address = "1.1.0".to_string();
        assert_eq!(config.source_address().unwrap().to_string(), "1.0.255");

        config.source_address = Some("1.1.250".to_string());
        assert_eq!(config.source_address().unwrap().to_string(), "1.1.250");
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("KNXFTP_LOG_LEVEL", "debug");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("KNXFTP_LOG_LEVEL");

        assert_eq!(config.log.level, "debug");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("KNXFTP_GATEWAY", "");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("KNXFTP_GATEWAY");

        assert_eq!(config.connection.gateway, "192.168.178.2");
    }

    #[test]
    #[serial]
    fn test_env_override_gateway() {
        std::env::set_var("KNXFTP_GATEWAY", "10.0.0.9");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("KNXFTP_GATEWAY");

        assert_eq!(config.connection.gateway, "10.0.0.9");
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_package_size_bounds() {
        let mut config = Config::default();
        config.transfer.package_size = 15;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPackageSize(15)));

        config.transfer.package_size = 16;
        assert!(config.validate().is_ok());

        config.transfer.package_size = 65535;
        assert!(config.validate().is_ok());

        config.transfer.package_size = 65536;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_port_zero() {
        let mut config = Config::default();
        config.connection.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn test_validate_gateway() {
        let mut config = Config::default();
        config.connection.gateway = "knx-gateway".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidGateway(_))));

        config.connection.kind = ConnectionKind::Virtual;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_device_address() {
        let mut config = Config::default();
        config.connection.device_address = "1.16.1".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidAddress {
                field: "device_address",
                value: "1.16.1".to_string()
            })
        );
    }

    #[test]
    fn test_validate_device_timeout_zero() {
        let mut config = Config::default();
        config.transfer.device_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidDeviceTimeout(0)));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.log.level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.log.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_helpful_error_messages() {
        let err = Config::from_toml("[transfer]\npackage_size = \"big\"")
            .unwrap_err()
            .to_string();
        assert!(err.contains("Invalid TOML"));
    }
}
