//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RAZWIRE_CONFIG)
//! 3. Environment variables

use crate::server::ServerConfig;
use razwire_protocol::{ByteOrder, DEFAULT_CAPACITY, MAX_PAYLOAD_SIZE};
use razwire_transport::TransportKind;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "RAZWIRE_CONFIG";

/// Main server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and peer settings.
    pub network: NetworkConfig,
    /// Framing settings.
    pub protocol: ProtocolConfig,
}

impl Config {
    /// Loads configuration from defaults, file, and environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(&|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        self.network.apply_overrides(lookup);
        self.protocol.apply_overrides(lookup);
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacity = self.protocol.packet_capacity;
        if capacity == 0 || capacity > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "packet_capacity must be between 1 and {}, got {}",
                MAX_PAYLOAD_SIZE, capacity
            )));
        }
        if self.network.max_peers == 0 {
            return Err(ConfigError::ValidationError(
                "max_peers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Runtime settings for [`Server::bind`](crate::Server::bind).
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.network.bind_addr)
            .with_transport(self.network.transport)
            .with_max_peers(self.network.max_peers)
            .with_poll_timeout(self.network.poll_timeout())
            .with_write_timeout(self.network.write_timeout())
            .with_packet_capacity(self.protocol.packet_capacity)
            .with_byte_order(self.protocol.byte_order.into())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Stream or datagram backend.
    pub transport: TransportKind,
    /// Peers beyond this count are disconnected on arrival.
    pub max_peers: usize,
    /// How long one receive cycle waits for readiness, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Socket write timeout in milliseconds.
    pub write_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7401)),
            transport: TransportKind::Tcp,
            max_peers: 1024,
            poll_timeout_ms: 100,
            write_timeout_ms: 5000,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("RAZWIRE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(kind) = lookup("RAZWIRE_TRANSPORT") {
            if let Ok(parsed) = kind.parse() {
                self.transport = parsed;
            }
        }

        if let Some(max) = lookup("RAZWIRE_MAX_PEERS") {
            if let Ok(n) = max.parse() {
                self.max_peers = n;
            }
        }

        if let Some(timeout) = lookup("RAZWIRE_POLL_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.poll_timeout_ms = ms;
            }
        }

        if let Some(timeout) = lookup("RAZWIRE_WRITE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.write_timeout_ms = ms;
            }
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Framing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Payload capacity of the receive packet.
    pub packet_capacity: usize,
    /// Byte order for head, payload and tail.
    pub byte_order: WireOrder,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            packet_capacity: DEFAULT_CAPACITY,
            byte_order: WireOrder::Native,
        }
    }
}

impl ProtocolConfig {
    fn apply_overrides(&mut self, lookup: &dyn Fn(&str) -> Option<String>) {
        if let Some(capacity) = lookup("RAZWIRE_PACKET_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.packet_capacity = n;
            }
        }

        if let Some(order) = lookup("RAZWIRE_BYTE_ORDER") {
            if let Ok(parsed) = order.parse() {
                self.byte_order = parsed;
            }
        }
    }
}

/// Configured byte order, as written in YAML and the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireOrder {
    #[default]
    Native,
    Network,
}

impl From<WireOrder> for ByteOrder {
    fn from(order: WireOrder) -> Self {
        match order {
            WireOrder::Native => ByteOrder::Native,
            WireOrder::Network => ByteOrder::Network,
        }
    }
}

impl FromStr for WireOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(WireOrder::Native),
            "network" => Ok(WireOrder::Network),
            other => Err(format!(
                "unknown byte order '{}', expected native or network",
                other
            )),
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to access config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// SocketAddr as a plain string in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
