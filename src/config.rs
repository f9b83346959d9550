//! Application configuration for the device client
//!
//! Broker presets, the device type used in client ids, and the location of
//! the profile store. Every section is optional; an empty file yields the
//! stock IoT Foundation settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// Device identity settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device type segment of the `d:<org>:<type>:<id>` client id
    #[serde(default = "default_device_type")]
    pub device_type: String,
    /// Name reported in accelerometer events
    #[serde(default = "default_sensor_name")]
    pub sensor_name: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            device_type: default_device_type(),
            sensor_name: default_sensor_name(),
        }
    }
}

/// Broker presets for the three connection kinds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Public broker used by quickstart sessions
    #[serde(default = "default_quickstart_host")]
    pub quickstart_host: String,
    /// Broker used by M2M demo sessions
    #[serde(default = "default_m2m_host")]
    pub m2m_host: String,
    /// Registered sessions connect to `<org>.<base_host>`
    #[serde(default = "default_base_host")]
    pub base_host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username sent with token authentication
    #[serde(default = "default_username")]
    pub username: String,
    /// Client id prefix for M2M sessions, followed by the device id
    #[serde(default = "default_m2m_client_prefix")]
    pub m2m_client_prefix: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long the transport waits for a CONNACK
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            quickstart_host: default_quickstart_host(),
            m2m_host: default_m2m_host(),
            base_host: default_base_host(),
            port: default_port(),
            username: default_username(),
            m2m_client_prefix: default_m2m_client_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl BrokerSection {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Profile persistence settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_device_type() -> String {
    "Android".to_string()
}

fn default_sensor_name() -> String {
    "Android Accelerometer".to_string()
}

fn default_quickstart_host() -> String {
    "quickstart.messaging.internetofthings.ibmcloud.com".to_string()
}

fn default_m2m_host() -> String {
    "messagesight.demos.ibm.com".to_string()
}

fn default_base_host() -> String {
    "messaging.internetofthings.ibmcloud.com".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_username() -> String {
    "use-token-auth".to_string()
}

fn default_m2m_client_prefix() -> String {
    "d:m2m:".to_string()
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_store_path() -> PathBuf {
    PathBuf::from("profiles.json")
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.device_type.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "device.device_type must not be empty".to_string(),
            ));
        }
        if self.device.device_type.contains(':') {
            return Err(ConfigError::InvalidConfig(format!(
                "device.device_type '{}' must not contain ':'",
                self.device.device_type
            )));
        }

        let hosts = [
            ("broker.quickstart_host", &self.broker.quickstart_host),
            ("broker.m2m_host", &self.broker.m2m_host),
            ("broker.base_host", &self.broker.base_host),
        ];
        for (field, host) in hosts {
            if host.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "{field} must not be empty"
                )));
            }
        }

        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.port must be greater than 0".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
device_type = "TestDevice"

[broker]
quickstart_host = "quickstart.example.test"
m2m_host = "m2m.example.test"
base_host = "messaging.example.test"
port = 1883
connect_timeout_secs = 2
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
