//! Bridge configuration
//!
//! Configuration is read from a TOML file whose path is given by `CONFIG_FILE`,
//! then individual fields may be overridden with `IOT_*` environment variables:
//!
//! ```toml
//! [mqtt]
//! broker_ip = "10.0.0.5"
//! broker_port = 1883
//! auth_user = "server"
//! auth_psw = "secret"
//! keepalive_interval = 60
//!
//! [mongo]
//! uri = "mongodb://localhost:27017"
//! database = "internetoftrash"
//!
//! [rpc]
//! request_timeout_ms = 30000
//!
//! [api]
//! listen_port = 8010
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value '{value}' for environment variable {key}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub mongo: MongoConfig,
    pub rpc: RpcConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_ip: String,
    pub broker_port: u16,
    pub client_id: String,
    pub auth_user: Option<String>,
    pub auth_psw: Option<String>,
    /// Seconds
    pub keepalive_interval: u64,
    /// 0, 1 or 2
    pub qos: u8,
    /// Capacity of the client request channel
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_ip: "127.0.0.1".to_string(),
            broker_port: 1883,
            client_id: "iot-server".to_string(),
            auth_user: None,
            auth_psw: None,
            keepalive_interval: 60,
            qos: 1,
            request_capacity: 64,
        }
    }
}

impl MqttConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub measurement_collection: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "internetoftrash".to_string(),
            measurement_collection: "measurements".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// 0 disables the deadline
    pub request_timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { request_timeout_ms: 30_000 }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { listen_port: 8010 }
    }
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `CONFIG_FILE` (defaults when unset), apply `IOT_*` overrides and validate
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => {
                info!(path = %path, "Loading configuration file");
                Self::from_file(&path)?
            }
            Err(_) => {
                info!("{} not set - using default configuration", CONFIG_FILE_ENV);
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("IOT_MQTT_BROKER_IP") {
            self.mqtt.broker_ip = v;
        }
        if let Some(v) = parse_env(&lookup, "IOT_MQTT_BROKER_PORT")? {
            self.mqtt.broker_port = v;
        }
        if let Some(v) = lookup("IOT_MQTT_CLIENT_ID") {
            self.mqtt.client_id = v;
        }
        if let Some(v) = lookup("IOT_MQTT_AUTH_USER") {
            self.mqtt.auth_user = Some(v);
        }
        if let Some(v) = lookup("IOT_MQTT_AUTH_PSW") {
            self.mqtt.auth_psw = Some(v);
        }
        if let Some(v) = parse_env(&lookup, "IOT_MQTT_KEEPALIVE_INTERVAL")? {
            self.mqtt.keepalive_interval = v;
        }
        if let Some(v) = parse_env(&lookup, "IOT_MQTT_QOS")? {
            self.mqtt.qos = v;
        }
        if let Some(v) = lookup("IOT_MONGO_URI") {
            self.mongo.uri = v;
        }
        if let Some(v) = lookup("IOT_MONGO_DATABASE") {
            self.mongo.database = v;
        }
        if let Some(v) = parse_env(&lookup, "IOT_RPC_REQUEST_TIMEOUT_MS")? {
            self.rpc.request_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "IOT_API_LISTEN_PORT")? {
            self.api.listen_port = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.broker_ip.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.broker_ip must not be empty".to_string()));
        }
        if self.mqtt.broker_port == 0 {
            return Err(ConfigError::Invalid("mqtt.broker_port must not be 0".to_string()));
        }
        if self.mqtt.keepalive_interval == 0 {
            return Err(ConfigError::Invalid("mqtt.keepalive_interval must be at least 1 second".to_string()));
        }
        if self.mqtt.qos > 2 {
            return Err(ConfigError::Invalid(format!("mqtt.qos must be 0, 1 or 2, got {}", self.mqtt.qos)));
        }
        if self.mqtt.auth_psw.is_some() && self.mqtt.auth_user.is_none() {
            return Err(ConfigError::Invalid("mqtt.auth_psw requires mqtt.auth_user".to_string()));
        }
        if self.api.listen_port == 0 {
            return Err(ConfigError::Invalid("api.listen_port must not be 0".to_string()));
        }
        debug!(broker = %self.mqtt.broker_ip, port = self.mqtt.broker_port, "Configuration valid");
        Ok(())
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key: key.to_string(), value }),
        None => Ok(None),
    }
}
