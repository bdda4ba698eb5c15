#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use vidmesh_core::domain::PeerAddr;
use vidmesh_net::{DownloadConfig, PeerConfig, PeerNode, Registry, RegistryConfig, RegistryServer};

/// Registry on an ephemeral port with the health monitor effectively parked.
pub async fn start_registry() -> (SocketAddr, Registry) {
    let config = RegistryConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        health_interval_secs: 3600,
        ..RegistryConfig::default()
    };
    let server = RegistryServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    tokio::spawn(server.serve());
    (addr, registry)
}

pub fn peer_config(registry: SocketAddr, dir: &Path) -> PeerConfig {
    PeerConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        advertise: None,
        registry: registry.to_string(),
        content_dir: dir.to_path_buf(),
        rescan_interval_secs: 3600,
        registry_silence_secs: 3600,
    }
}

/// Start a serving peer and wait until the registry knows it.
pub async fn start_peer(registry_addr: SocketAddr, registry: &Registry, dir: &Path) -> PeerAddr {
    let node = PeerNode::bind(peer_config(registry_addr, dir)).await.unwrap();
    let me = node.advertised().clone();
    tokio::spawn(node.serve());
    wait_for_peer(registry, &me).await;
    me
}

pub async fn wait_for_peer(registry: &Registry, peer: &PeerAddr) {
    wait_until(|| async move { registry.snapshot().await.peer(peer).is_some() }).await;
}

pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

pub fn download_config(registry: SocketAddr) -> DownloadConfig {
    DownloadConfig {
        registry: registry.to_string(),
        connect_timeout_secs: 2,
        part_read_timeout_secs: 5,
        ..DownloadConfig::default()
    }
}

pub fn content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8 ^ (i / 251) as u8).collect()
}

pub fn write_content(dir: &Path, name: &str, size: usize) -> Vec<u8> {
    let data = content(size);
    std::fs::write(dir.join(name), &data).unwrap();
    data
}
