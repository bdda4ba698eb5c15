mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use vidmesh_core::domain::{ContentDescriptor, PeerAddr};
use vidmesh_core::registry::ProbeVerdict;
use vidmesh_core::wire::Command;
use vidmesh_net::peer::announce;
use vidmesh_net::{HealthMonitor, Registry, RegistryConfig, probe, query};

use common::*;

const T: Duration = Duration::from_secs(2);

#[tokio::test]
async fn empty_registry_answers_empty_listing() {
    let (addr, _registry) = start_registry().await;
    let catalog = query(&addr.to_string(), T, T).await.unwrap();
    assert!(catalog.is_empty());
}

#[tokio::test]
async fn register_then_query_over_tcp() {
    let (addr, registry) = start_registry().await;
    let peer = PeerAddr::new("127.0.0.1", 9101);
    announce(
        &addr.to_string(),
        &Command::Register {
            peer: peer.clone(),
            holdings: vec![
                ContentDescriptor::new("a.mp4", 10),
                ContentDescriptor::new("b.mp4", 3),
            ],
        },
    )
    .await
    .unwrap();
    wait_for_peer(&registry, &peer).await;

    let catalog = query(&addr.to_string(), T, T).await.unwrap();
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.get("a.mp4").unwrap().size, 10);
    assert_eq!(catalog.get("b.mp4").unwrap().peers, vec![peer.clone()]);

    // re-registration replaces the holdings wholesale
    announce(
        &addr.to_string(),
        &Command::Update {
            peer: peer.clone(),
            holdings: vec![ContentDescriptor::new("c.mp4", 5)],
        },
    )
    .await
    .unwrap();
    let (r, p) = (&registry, &peer);
    wait_until(|| async move {
        r.snapshot()
            .await
            .peer(p)
            .is_some_and(|rec| rec.holdings.contains_key("c.mp4"))
    })
    .await;

    let catalog = query(&addr.to_string(), T, T).await.unwrap();
    assert_eq!(catalog.len(), 1);
    assert!(catalog.get("a.mp4").is_none());
    assert_eq!(catalog.get("c.mp4").unwrap().size, 5);
}

#[tokio::test]
async fn registry_lists_every_holder() {
    let (addr, registry) = start_registry().await;
    let p1 = PeerAddr::new("10.0.0.1", 9000);
    let p2 = PeerAddr::new("10.0.0.2", 9000);
    registry.register(p1.clone(), vec![ContentDescriptor::new("a.mp4", 7)]).await;
    registry.register(p2.clone(), vec![ContentDescriptor::new("a.mp4", 7)]).await;

    let raw = registry.query().await;
    assert_eq!(raw.lines().count(), 2);
    assert!(raw.contains("a.mp4 7 bytes available at 10.0.0.1:9000"));

    let catalog = query(&addr.to_string(), T, T).await.unwrap();
    let mut peers = catalog.get("a.mp4").unwrap().peers.clone();
    peers.sort_by_key(|p| p.to_string());
    assert_eq!(peers, vec![p1, p2]);
}

/// A peer whose heartbeat answer can be switched between `pong` and garbage.
async fn switchable_peer(healthy: Arc<AtomicBool>) -> PeerAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = PeerAddr::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let healthy = Arc::clone(&healthy);
            tokio::spawn(async move {
                let (rd, mut wr) = stream.into_split();
                let mut line = String::new();
                let mut rd = BufReader::new(rd);
                if rd.read_line(&mut line).await.unwrap_or(0) == 0 {
                    return;
                }
                let reply: &[u8] = if healthy.load(Ordering::SeqCst) {
                    b"pong\n"
                } else {
                    b"nope\n"
                };
                let _ = wr.write_all(reply).await;
            });
        }
    });
    addr
}

fn monitor(registry: &Registry) -> HealthMonitor {
    let config = RegistryConfig {
        probe_timeout_secs: 1,
        ..RegistryConfig::default()
    };
    HealthMonitor::new(registry.clone(), &config)
}

#[tokio::test]
async fn probe_accepts_only_pong() {
    let healthy = Arc::new(AtomicBool::new(true));
    let peer = switchable_peer(Arc::clone(&healthy)).await;
    probe(&peer, T).await.unwrap();
    healthy.store(false, Ordering::SeqCst);
    assert!(probe(&peer, T).await.is_err());
}

#[tokio::test]
async fn peer_evicted_after_three_failed_rounds() {
    let healthy = Arc::new(AtomicBool::new(false));
    let peer = switchable_peer(Arc::clone(&healthy)).await;
    let registry = Registry::new();
    registry.register(peer.clone(), vec![ContentDescriptor::new("a.mp4", 1)]).await;
    let monitor = monitor(&registry);

    assert_eq!(monitor.run_round().await, vec![(peer.clone(), ProbeVerdict::Failing(1))]);
    assert_eq!(monitor.run_round().await, vec![(peer.clone(), ProbeVerdict::Failing(2))]);
    assert!(registry.snapshot().await.peer(&peer).is_some());
    assert_eq!(monitor.run_round().await, vec![(peer.clone(), ProbeVerdict::Evicted)]);

    let table = registry.snapshot().await;
    assert!(table.is_empty());
    assert!(table.holders("a.mp4").is_empty());
    assert_eq!(registry.query().await, "");
}

#[tokio::test]
async fn unreachable_peer_is_evicted() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer = PeerAddr::from(closed.local_addr().unwrap());
    drop(closed);

    let registry = Registry::new();
    registry.register(peer.clone(), vec![]).await;
    let monitor = monitor(&registry);
    for _ in 0..3 {
        monitor.run_round().await;
    }
    assert!(registry.snapshot().await.is_empty());
}

#[tokio::test]
async fn success_resets_failure_count() {
    let healthy = Arc::new(AtomicBool::new(false));
    let peer = switchable_peer(Arc::clone(&healthy)).await;
    let registry = Registry::new();
    registry.register(peer.clone(), vec![ContentDescriptor::new("a.mp4", 1)]).await;
    let monitor = monitor(&registry);

    monitor.run_round().await;
    monitor.run_round().await;
    healthy.store(true, Ordering::SeqCst);
    assert_eq!(monitor.run_round().await, vec![(peer.clone(), ProbeVerdict::Healthy)]);
    assert_eq!(
        registry.snapshot().await.peer(&peer).unwrap().consecutive_failures,
        0
    );

    healthy.store(false, Ordering::SeqCst);
    monitor.run_round().await;
    assert_eq!(monitor.run_round().await, vec![(peer.clone(), ProbeVerdict::Failing(2))]);
    assert!(registry.snapshot().await.peer(&peer).is_some());
}

#[tokio::test]
async fn bad_commands_drop_only_their_connection() {
    let (addr, registry) = start_registry().await;
    let peer = PeerAddr::new("10.0.0.3", 9000);
    registry.register(peer.clone(), vec![ContentDescriptor::new("a.mp4", 4)]).await;

    for line in ["HELLO\n", "ping\n", "DOWNLOAD a.mp4 PART 0 OF 1\n"] {
        let mut s = TcpStream::connect(addr).await.unwrap();
        s.write_all(line.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        // closed either cleanly or by reset, but never answered
        let read = tokio::time::timeout(T, s.read_to_end(&mut buf)).await;
        assert!(read.is_ok(), "{line:?} left the connection open");
        assert!(buf.is_empty(), "{line:?} got a reply");
    }

    let catalog = query(&addr.to_string(), T, T).await.unwrap();
    assert_eq!(catalog.get("a.mp4").unwrap().peers, vec![peer]);
}

/// Answers every heartbeat with garbage after `delay`.
async fn slow_failing_peer(delay: Duration) -> PeerAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = PeerAddr::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (rd, mut wr) = stream.into_split();
                let mut line = String::new();
                let _ = BufReader::new(rd).read_line(&mut line).await;
                tokio::time::sleep(delay).await;
                let _ = wr.write_all(b"nope\n").await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn reregistration_during_a_round_is_not_penalised() {
    let peer = slow_failing_peer(Duration::from_millis(400)).await;
    let registry = Registry::new();
    registry.register(peer.clone(), vec![ContentDescriptor::new("a.mp4", 1)]).await;
    let monitor = monitor(&registry);

    let round = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.run_round().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    registry.register(peer.clone(), vec![ContentDescriptor::new("b.mp4", 2)]).await;

    assert_eq!(round.await.unwrap(), vec![(peer.clone(), ProbeVerdict::Stale)]);
    let table = registry.snapshot().await;
    assert_eq!(table.peer(&peer).unwrap().consecutive_failures, 0);
    assert_eq!(table.holders("b.mp4"), &[peer.clone()]);

    // the next round counts against the new record
    assert_eq!(monitor.run_round().await, vec![(peer.clone(), ProbeVerdict::Failing(1))]);
}
