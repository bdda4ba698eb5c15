//! Registry/tracker service: accepts registrations, answers QUERY and evicts dead peers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vidmesh_core::domain::{ContentDescriptor, PeerAddr};
use vidmesh_core::error::{MeshError, Result};
use vidmesh_core::registry::{ProbeVerdict, RegistryTable};
use vidmesh_core::wire::{Command, PONG};

use crate::config::RegistryConfig;
use crate::conn::{connect_peer, read_line};

/// Shared handle to the peer table. A single lock serialises every read and write.
#[derive(Clone, Default)]
pub struct Registry {
    table: Arc<RwLock<RegistryTable>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, peer: PeerAddr, holdings: Vec<ContentDescriptor>) {
        self.table.write().await.register(peer, holdings);
    }

    pub async fn query(&self) -> String {
        self.table.read().await.listing()
    }

    /// Copy of the current table.
    pub async fn snapshot(&self) -> RegistryTable {
        self.table.read().await.clone()
    }
}

pub struct RegistryServer {
    listener: TcpListener,
    registry: Registry,
    config: RegistryConfig,
}

impl RegistryServer {
    pub async fn bind(config: RegistryConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        info!(addr = %listener.local_addr()?, "registry listening");
        Ok(Self {
            listener,
            registry: Registry::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Registry {
        self.registry.clone()
    }

    pub fn health_monitor(&self) -> HealthMonitor {
        HealthMonitor::new(self.registry.clone(), &self.config)
    }

    /// Run the health monitor and the accept loop until the listener fails.
    pub async fn serve(self) -> Result<()> {
        tokio::spawn(self.health_monitor().run());
        loop {
            let (stream, from) = self.listener.accept().await?;
            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &registry).await {
                    warn!(%from, error = %e, "registry connection dropped");
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, registry: &Registry) -> Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    while let Some(line) = read_line(&mut rd).await? {
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line)? {
            Command::Query => {
                let listing = registry.query().await;
                wr.write_all(listing.as_bytes()).await?;
                wr.shutdown().await?;
                debug!(lines = listing.lines().count(), "answered query");
                return Ok(());
            }
            Command::Register { peer, holdings } | Command::Update { peer, holdings } => {
                registry.register(peer, holdings).await;
            }
            other => {
                return Err(MeshError::Protocol(format!(
                    "registry does not accept {:?}",
                    other.encode().trim_end()
                )));
            }
        }
    }
    Ok(())
}

/// Periodically pings every registered peer and drops the ones that stop answering.
#[derive(Clone)]
pub struct HealthMonitor {
    registry: Registry,
    interval: Duration,
    probe_timeout: Duration,
    threshold: u32,
}

impl HealthMonitor {
    pub fn new(registry: Registry, config: &RegistryConfig) -> Self {
        Self {
            registry,
            interval: config.health_interval(),
            probe_timeout: config.probe_timeout(),
            threshold: config.eviction_threshold.max(1),
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_round().await;
        }
    }

    /// Probe every peer once, concurrently, then apply all verdicts under one lock.
    ///
    /// A verdict only lands on the record it was taken against; a peer that re-registered
    /// while the round was running comes back as [`ProbeVerdict::Stale`].
    pub async fn run_round(&self) -> Vec<(PeerAddr, ProbeVerdict)> {
        let targets = self.registry.table.read().await.probe_targets();
        let mut probes = JoinSet::new();
        for (peer, generation) in targets {
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                let res = probe(&peer, timeout).await;
                (peer, generation, res)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(r) => results.push(r),
                Err(e) => warn!(error = %e, "heartbeat task failed"),
            }
        }

        let mut table = self.registry.table.write().await;
        results
            .into_iter()
            .map(|(peer, generation, res)| {
                if let Err(e) = &res {
                    debug!(%peer, error = %e, "heartbeat failed");
                }
                let verdict = table.record_probe(&peer, generation, res.is_ok(), self.threshold);
                match verdict {
                    ProbeVerdict::Failing(n) => warn!(%peer, failures = n, "peer missed heartbeat"),
                    ProbeVerdict::Evicted => warn!(%peer, "peer removed after missed heartbeats"),
                    ProbeVerdict::Healthy | ProbeVerdict::Unknown | ProbeVerdict::Stale => {}
                }
                (peer, verdict)
            })
            .collect()
    }
}

/// One heartbeat: connect, send `ping`, expect exactly `pong`.
pub async fn probe(peer: &PeerAddr, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, ping_pong(peer, timeout)).await {
        Ok(res) => res,
        Err(_) => Err(MeshError::PeerTimeout { peer: peer.clone() }),
    }
}

async fn ping_pong(peer: &PeerAddr, connect_timeout: Duration) -> Result<()> {
    let stream = connect_peer(peer, connect_timeout).await?;
    let (rd, mut wr) = stream.into_split();
    wr.write_all(Command::Ping.encode().as_bytes()).await?;
    let mut rd = BufReader::new(rd);
    match read_line(&mut rd).await? {
        Some(reply) if reply.trim_end_matches(['\r', '\n']) == PONG => Ok(()),
        Some(reply) => Err(MeshError::Protocol(format!("bad heartbeat reply {reply:?}"))),
        None => Err(MeshError::Protocol("peer closed without heartbeat reply".into())),
    }
}
