//! Link configuration.
//!
//! Configuration is read from TOML. Every field except `mqtt.broker` has a
//! default, so the smallest useful file is:
//!
//! ```toml
//! [mqtt]
//! broker = "localhost"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config_err;
use crate::error::{Error, Result};

/// Environment variable names.
pub mod env_vars {
    pub const MQTT_BROKER: &str = "TELELINK_MQTT_BROKER";
    pub const MQTT_PORT: &str = "TELELINK_MQTT_PORT";
    pub const LOG_JSON: &str = "TELELINK_LOG_JSON";
}

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("invalid QoS level {}, expected 0, 1 or 2", other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// MQTT broker session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address
    pub broker: String,

    /// Broker port; see [`MqttConfig::port`] when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Client ID (auto-generated if not provided)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Use TLS with the platform root certificates
    #[serde(default)]
    pub tls: bool,

    /// QoS of the root subscription
    #[serde(default)]
    pub qos: Qos,

    /// Wildcard subscription covering every device sub-topic
    #[serde(default = "default_root_topic")]
    pub root_topic: String,

    /// Bounded wait for CONNACK/SUBACK
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Bounded wait for the delivery task to wind down on stop
    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_secs: u64,

    /// Request channel capacity of the MQTT client
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_keep_alive() -> u64 {
    60
}
fn default_clean_session() -> bool {
    true
}
fn default_root_topic() -> String {
    "#".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_disconnect_timeout() -> u64 {
    5
}
fn default_channel_capacity() -> usize {
    64
}

impl MqttConfig {
    /// Create a new MQTT configuration.
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: None,
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            clean_session: default_clean_session(),
            tls: false,
            qos: Qos::default(),
            root_topic: default_root_topic(),
            connect_timeout_secs: default_connect_timeout(),
            disconnect_timeout_secs: default_disconnect_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Configured port, or 1883 (8883 with TLS) when unset.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.tls { 8883 } else { 1883 })
    }

    /// Get the full broker address.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port())
    }

    /// Configured client ID, or a fresh `telelink-<uuid>` one.
    pub fn client_id_or_default(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("telelink-{}", uuid::Uuid::new_v4()))
    }
}

/// Packet preprocessor configuration.
///
/// Negative offsets mean the field is not present in the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Byte offset of a big-endian u64 millisecond timestamp
    #[serde(default = "default_timestamp_offset")]
    pub timestamp_offset: i32,
    /// Byte offset of a big-endian u32 sequence count
    #[serde(default = "default_seq_count_offset")]
    pub seq_count_offset: i32,
}

fn default_timestamp_offset() -> i32 {
    -1
}
fn default_seq_count_offset() -> i32 {
    0
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            timestamp_offset: default_timestamp_offset(),
            seq_count_offset: default_seq_count_offset(),
        }
    }
}

/// Aggregate link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Aggregate link name, prefix of every device sub-link name
    #[serde(default = "default_link_name")]
    pub name: String,

    pub mqtt: MqttConfig,

    #[serde(default)]
    pub preprocessor: PreprocessorConfig,
}

fn default_link_name() -> String {
    "devices".to_string()
}

impl LinkConfig {
    pub fn new(name: impl Into<String>, mqtt: MqttConfig) -> Self {
        Self {
            name: name.into(),
            mqtt,
            preprocessor: PreprocessorConfig::default(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LinkConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, apply environment overrides, and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| config_err!("Failed to read {}: {}", path.display(), e))?;
        let mut config: LinkConfig = toml::from_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TELELINK_MQTT_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(broker) = std::env::var(env_vars::MQTT_BROKER) {
            self.mqtt.broker = broker;
        }
        if let Ok(port) = std::env::var(env_vars::MQTT_PORT) {
            let port = port
                .parse()
                .map_err(|_| config_err!("{} is not a valid port: {}", env_vars::MQTT_PORT, port))?;
            self.mqtt.port = Some(port);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(config_err!(
                "link name must be non-empty and must not contain '/': {:?}",
                self.name
            ));
        }
        if self.mqtt.broker.trim().is_empty() {
            return Err(config_err!("mqtt.broker must not be empty"));
        }
        if self.mqtt.root_topic.is_empty() {
            return Err(config_err!("mqtt.root_topic must not be empty"));
        }
        if self.mqtt.connect_timeout_secs == 0 || self.mqtt.disconnect_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be at least one second".to_string()));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(config_err!("mqtt.channel_capacity must be positive"));
        }
        Ok(())
    }
}
