//! Runtime settings for the registry, content peers and downloaders.
//!
//! Every struct can be read from a JSON file; missing fields fall back to the defaults
//! below, and command-line flags override individual values afterwards.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use vidmesh_core::error::{MeshError, Result};
use vidmesh_core::registry::DEFAULT_EVICTION_THRESHOLD;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub listen: SocketAddr,
    pub health_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub eviction_threshold: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            health_interval_secs: 10,
            probe_timeout_secs: 10,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
        }
    }
}

impl RegistryConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub listen: SocketAddr,
    /// `host:port` sent to the registry; the bound address when unset.
    pub advertise: Option<String>,
    pub registry: String,
    pub content_dir: PathBuf,
    pub rescan_interval_secs: u64,
    /// Re-register after this long without a heartbeat from the registry.
    pub registry_silence_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9000)),
            advertise: None,
            registry: "127.0.0.1:8000".into(),
            content_dir: PathBuf::from("./videos"),
            rescan_interval_secs: 10,
            registry_silence_secs: 30,
        }
    }
}

impl PeerConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    pub fn registry_silence(&self) -> Duration {
        Duration::from_secs(self.registry_silence_secs)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub registry: String,
    pub connect_timeout_secs: u64,
    pub part_read_timeout_secs: u64,
    pub max_concurrent_fetches: usize,
    /// Where part files are staged; a temp dir next to the destination when unset.
    pub staging_dir: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            registry: "127.0.0.1:8000".into(),
            connect_timeout_secs: 5,
            part_read_timeout_secs: 30,
            max_concurrent_fetches: 8,
            staging_dir: None,
        }
    }
}

impl DownloadConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn part_read_timeout(&self) -> Duration {
        Duration::from_secs(self.part_read_timeout_secs)
    }
}

/// Read a config file, or return the defaults when `path` is `None`.
pub fn load<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| MeshError::Config(format!("{}: {e}", path.display())))
}
