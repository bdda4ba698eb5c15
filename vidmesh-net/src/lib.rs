#![forbid(unsafe_code)]

pub mod config;
pub mod conn;
pub mod download;
pub mod peer;
pub mod registry;

pub use config::{DownloadConfig, PeerConfig, RegistryConfig};
pub use download::{DownloadSession, DownloadState, PartReport, fetch_all, query};
pub use peer::{
    DirectoryWatcher, HeartbeatClock, PeerNode, RegistryWatchdog, serve_connection, serve_range,
};
pub use registry::{HealthMonitor, Registry, RegistryServer, probe};
