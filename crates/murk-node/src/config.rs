//! Node configuration: defaults, environment overrides, TOML file.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Local bind address for the combined messenger + DHT API.
    pub bind_addr: SocketAddr,
    /// Host peers should use to reach us; advertised in the DHT and
    /// inside sealed payloads.
    pub external_host: String,
    /// Directory holding the key bundle and databases.
    pub data_dir: PathBuf,
    /// Key-bundle filename inside `data_dir`.
    pub key_bundle_file: String,
    /// Kademlia bucket size and replication factor.
    pub ksize: usize,
    /// Peers to bootstrap against at startup, as `host:port`.
    pub bootstrap_peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".parse().unwrap(),
            external_host: "127.0.0.1".to_string(),
            data_dir: PathBuf::from("./murk-data"),
            key_bundle_file: "keys.json".to_string(),
            ksize: 20,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Defaults, then environment variables, then an optional TOML
    /// file named by `MURK_CONFIG`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("MURK_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("invalid bind_addr: {e}")))?;
        }
        if let Ok(host) = std::env::var("MURK_EXTERNAL_HOST") {
            config.external_host = host;
        }
        if let Ok(dir) = std::env::var("MURK_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(ksize) = std::env::var("MURK_KSIZE") {
            config.ksize = ksize
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("invalid ksize: {e}")))?;
        }
        if let Ok(peers) = std::env::var("MURK_BOOTSTRAP_PEERS") {
            config.bootstrap_peers =
                peers.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }

        if let Ok(path) = std::env::var("MURK_CONFIG") {
            config.merge_toml(&path)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn merge_toml(&mut self, path: &str) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let value: toml::Value = toml::from_str(&content)?;

        if let Some(addr) = value.get("bind_addr").and_then(|v| v.as_str()) {
            self.bind_addr = addr
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("invalid bind_addr in toml: {e}")))?;
        }
        if let Some(host) = value.get("external_host").and_then(|v| v.as_str()) {
            self.external_host = host.to_string();
        }
        if let Some(dir) = value.get("data_dir").and_then(|v| v.as_str()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(file) = value.get("key_bundle_file").and_then(|v| v.as_str()) {
            self.key_bundle_file = file.to_string();
        }
        if let Some(ksize) = value.get("ksize").and_then(|v| v.as_integer()) {
            self.ksize = ksize as usize;
        }
        if let Some(peers) = value.get("bootstrap_peers").and_then(|v| v.as_array()) {
            self.bootstrap_peers =
                peers.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ksize == 0 {
            return Err(ConfigError::Invalid("ksize must be > 0".to_string()));
        }
        if self.external_host.is_empty() {
            return Err(ConfigError::Invalid("external_host must not be empty".to_string()));
        }
        if self.key_bundle_file.is_empty() {
            return Err(ConfigError::Invalid("key_bundle_file must not be empty".to_string()));
        }
        for peer in &self.bootstrap_peers {
            parse_peer(peer).ok_or_else(|| {
                ConfigError::Invalid(format!("invalid bootstrap peer '{peer}', expected host:port"))
            })?;
        }
        Ok(())
    }

    /// The address peers reach us at.
    pub fn external_addr(&self) -> String {
        format!("http://{}:{}", self.external_host, self.bind_addr.port())
    }

    pub fn key_bundle_path(&self) -> PathBuf {
        self.data_dir.join(&self.key_bundle_file)
    }

    pub fn messenger_db_path(&self) -> PathBuf {
        self.data_dir.join("messenger.db")
    }

    pub fn kad_db_path(&self) -> PathBuf {
        self.data_dir.join("kademlia.db")
    }
}

/// Parse `host:port`.
pub fn parse_peer(peer: &str) -> Option<(String, u16)> {
    let (host, port) = peer.rsplit_once(':')?;
    let port = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}
