//! Configuration structs and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};
use smo_protocol::ClientId;

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub proxy: ProxySection,
    pub client: ClientSection,
    pub debug: DebugConfig,
}

/// Dedicated server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// Interface to bind.
    pub address: String,
    pub port: u16,
    /// Players admitted at once.
    pub max_players: u16,
}

/// Relay settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxySection {
    /// Interface game clients connect to.
    pub host_address: String,
    pub host_port: u16,
    /// Upstream server.
    pub server_address: String,
    pub server_port: u16,
}

/// Headless client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientSection {
    pub server_address: String,
    pub server_port: u16,
    /// Player name announced to the server.
    pub name: String,
    /// Player identity. Nil means "generate one on first start".
    pub client_id: ClientId,
    pub try_reconnecting: bool,
    /// First reconnect delay in milliseconds.
    pub reconnect_initial_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub reconnect_max_ms: u64,
    /// Give up after this many failed attempts. `None` retries forever.
    pub reconnect_max_attempts: Option<u32>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// `EnvFilter` directive, e.g. `"info"` or `"info,smo_net=debug"`.
    /// `RUST_LOG` takes precedence.
    pub log_level: String,
    /// Log every packet seen by the server, proxy or client.
    pub log_packets: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 1027,
            max_players: 8,
        }
    }
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            host_address: "0.0.0.0".to_string(),
            host_port: 1027,
            server_address: "127.0.0.1".to_string(),
            server_port: 1027,
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 1027,
            name: "Mario".to_string(),
            client_id: ClientId::NIL,
            try_reconnecting: true,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            reconnect_max_attempts: None,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_packets: true,
        }
    }
}

impl Config {
    /// Load `config.ron` from `config_dir`, writing the defaults there first if
    /// it does not exist.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(config_dir)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    fn read(config_dir: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(config_dir.join(CONFIG_FILE))
            .map_err(ConfigError::ReadError)?;
        ron::from_str(&contents).map_err(ConfigError::ParseError)
    }

    /// Write `config.ron` into `config_dir`, creating the directory if needed.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Re-read the file. `Some` only if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let fresh = Self::read(config_dir)?;
        if &fresh != self {
            log::info!("Config reloaded with changes");
            Ok(Some(fresh))
        } else {
            Ok(None)
        }
    }
}
