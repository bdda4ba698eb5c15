mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use vidmesh_core::domain::ContentDescriptor;
use vidmesh_core::error::MeshError;
use vidmesh_core::holdings;
use vidmesh_core::wire::{RANGE_HEADER_LEN, decode_range_header};
use vidmesh_net::{PeerConfig, PeerNode, probe, serve_range};

use common::*;

async fn raw_download(peer: &vidmesh_core::domain::PeerAddr, line: &str) -> Vec<u8> {
    let mut s = TcpStream::connect((peer.host.as_str(), peer.port)).await.unwrap();
    s.write_all(line.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), s.read_to_end(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

#[tokio::test]
async fn serves_requested_range_with_length_header() {
    let (addr, registry) = start_registry().await;
    let dir = tempfile::tempdir().unwrap();
    let data = write_content(dir.path(), "a.mp4", 10);
    let peer = start_peer(addr, &registry, dir.path()).await;

    let mut s = TcpStream::connect((peer.host.as_str(), peer.port)).await.unwrap();
    s.write_all(b"DOWNLOAD a.mp4 PART 2 OF 3\n").await.unwrap();
    let mut header = [0u8; RANGE_HEADER_LEN];
    s.read_exact(&mut header).await.unwrap();
    assert_eq!(decode_range_header(header), 4);
    let mut body = [0u8; 4];
    s.read_exact(&mut body).await.unwrap();
    assert_eq!(&body, &data[6..10]);

    // same connection keeps working
    s.write_all(b"ping\n").await.unwrap();
    let mut pong = [0u8; 5];
    s.read_exact(&mut pong).await.unwrap();
    assert_eq!(&pong, b"pong\n");
}

#[tokio::test]
async fn missing_file_closes_without_bytes() {
    let (addr, registry) = start_registry().await;
    let dir = tempfile::tempdir().unwrap();
    let peer = start_peer(addr, &registry, dir.path()).await;

    assert!(raw_download(&peer, "DOWNLOAD ghost.mp4 PART 0 OF 1\n").await.is_empty());
    assert!(raw_download(&peer, "DOWNLOAD ../etc PART 0 OF 1\n").await.is_empty());
    assert!(raw_download(&peer, "DOWNLOAD a PART 3 OF 3\n").await.is_empty());
}

#[tokio::test]
async fn peer_answers_heartbeat() {
    let (addr, registry) = start_registry().await;
    let dir = tempfile::tempdir().unwrap();
    let peer = start_peer(addr, &registry, dir.path()).await;
    probe(&peer, Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn serve_range_writes_header_then_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let data = write_content(dir.path(), "x.bin", 7);
    let mut out = Vec::new();
    let n = serve_range(&mut out, dir.path(), "x.bin", 0, 2).await.unwrap();
    assert_eq!(n, 3);
    assert_eq!(decode_range_header(out[..8].try_into().unwrap()), 3);
    assert_eq!(&out[8..], &data[..3]);

    let mut out = Vec::new();
    let err = serve_range(&mut out, dir.path(), "absent.bin", 0, 1).await.unwrap_err();
    assert!(matches!(err, MeshError::FileNotFound(_)));
    assert!(out.is_empty());
}

#[tokio::test]
async fn watcher_sends_update_on_change() {
    let (addr, registry) = start_registry().await;
    let dir = tempfile::tempdir().unwrap();
    write_content(dir.path(), "a.mp4", 10);

    let node = PeerNode::bind(peer_config(addr, dir.path())).await.unwrap();
    let me = node.advertised().clone();
    let snapshot = node.register_self().await.unwrap();
    wait_for_peer(&registry, &me).await;
    let mut watcher = node.directory_watcher(snapshot);

    assert!(!watcher.check().await.unwrap());

    write_content(dir.path(), "b.mp4", 3);
    assert!(watcher.check().await.unwrap());
    let expected: BTreeSet<_> = [
        ContentDescriptor::new("a.mp4", 10),
        ContentDescriptor::new("b.mp4", 3),
    ]
    .into();
    assert_eq!(watcher.snapshot(), &expected);

    let (r, p) = (&registry, &me);
    wait_until(|| async move {
        r.snapshot()
            .await
            .peer(p)
            .is_some_and(|rec| rec.holdings.len() == 2)
    })
    .await;

    std::fs::remove_file(dir.path().join("a.mp4")).unwrap();
    assert!(watcher.check().await.unwrap());
    wait_until(|| async move { r.snapshot().await.holders("a.mp4").is_empty() }).await;
    assert_eq!(registry.snapshot().await.holders("b.mp4"), &[me.clone()]);
}

#[tokio::test]
async fn failed_update_is_retried_next_cycle() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_registry = closed.local_addr().unwrap();
    drop(closed);

    let dir = tempfile::tempdir().unwrap();
    write_content(dir.path(), "a.mp4", 10);
    let node = PeerNode::bind(peer_config(dead_registry, dir.path())).await.unwrap();
    assert!(matches!(
        node.register_self().await,
        Err(MeshError::RegistryUnreachable { .. })
    ));

    let mut watcher = node.directory_watcher(BTreeSet::new());
    assert!(watcher.check().await.is_err());
    assert!(watcher.snapshot().is_empty());
    assert!(watcher.check().await.is_err());
    assert!(watcher.snapshot().is_empty());
}

#[tokio::test]
async fn quiet_registry_gets_a_fresh_registration() {
    // a registry that restarted and lost its table
    let (addr, registry) = start_registry().await;
    let dir = tempfile::tempdir().unwrap();
    write_content(dir.path(), "a.mp4", 10);
    let config = PeerConfig {
        registry_silence_secs: 0,
        ..peer_config(addr, dir.path())
    };
    let node = PeerNode::bind(config).await.unwrap();
    let me = node.advertised().clone();

    let mut watcher = node.directory_watcher(holdings::scan(dir.path()).unwrap());
    assert!(!watcher.check().await.unwrap());
    assert!(registry.snapshot().await.peer(&me).is_none());

    let mut watchdog = node.registry_watchdog();
    assert!(watchdog.check().await.unwrap());
    wait_for_peer(&registry, &me).await;
    assert_eq!(registry.snapshot().await.holders("a.mp4"), &[me.clone()]);
}

#[tokio::test]
async fn heartbeats_keep_the_watchdog_quiet() {
    let (addr, registry) = start_registry().await;
    let dir = tempfile::tempdir().unwrap();
    let config = PeerConfig {
        registry_silence_secs: 30,
        ..peer_config(addr, dir.path())
    };
    let node = PeerNode::bind(config).await.unwrap();
    let me = node.advertised().clone();
    let clock = node.heartbeat();
    let mut watchdog = node.registry_watchdog();
    assert!(clock.last_ping().is_none());

    tokio::spawn(node.serve());
    wait_for_peer(&registry, &me).await;
    probe(&me, Duration::from_secs(2)).await.unwrap();

    assert!(clock.last_ping().is_some());
    assert!(clock.silence() < Duration::from_secs(30));
    assert!(!watchdog.check().await.unwrap());
}
