//! Configuration for the light client

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default atom cache directory
pub fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("atom-light-client")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Node RPC websocket URL
    #[serde(default = "default_node_url")]
    pub node_url: String,

    /// Remote signing service websocket URL
    #[serde(default = "default_identity_url")]
    pub identity_url: String,

    /// Hard timeout for opening the node socket, in seconds
    #[serde(default = "default_open_timeout")]
    pub open_timeout_secs: u64,

    /// Hard timeout for an atom submission call, in seconds
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,

    /// Keepalive interval on an open connection, in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Grace window before an idle connection is closed, in seconds
    #[serde(default = "default_idle_grace")]
    pub idle_grace_secs: u64,

    /// Directory for the optional atom cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_node_url() -> String {
    "ws://localhost:8080/rpc".to_string()
}

fn default_identity_url() -> String {
    "ws://localhost:54345".to_string()
}

fn default_open_timeout() -> u64 {
    5
}

fn default_submit_timeout() -> u64 {
    5
}

fn default_keepalive_interval() -> u64 {
    10
}

fn default_idle_grace() -> u64 {
    5
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_url: default_node_url(),
            identity_url: default_identity_url(),
            open_timeout_secs: default_open_timeout(),
            submit_timeout_secs: default_submit_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            idle_grace_secs: default_idle_grace(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl ClientConfig {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the sled database path for the atom cache
    pub fn atom_cache_path(&self) -> PathBuf {
        self.cache_dir.join("atoms.sled")
    }
}
