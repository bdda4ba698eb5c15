//! Content peer: serves byte ranges of local files and keeps the registry's view current.

use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vidmesh_core::domain::{ContentDescriptor, PeerAddr};
use vidmesh_core::error::{MeshError, Result};
use vidmesh_core::holdings;
use vidmesh_core::plan::part_range;
use vidmesh_core::wire::{Command, PONG, encode_range_header};

use crate::config::PeerConfig;
use crate::conn::{connect_registry, read_line};

const REGISTRY_TIMEOUT: Duration = Duration::from_secs(5);

pub type Snapshot = BTreeSet<ContentDescriptor>;

pub struct PeerNode {
    listener: TcpListener,
    advertised: PeerAddr,
    config: PeerConfig,
    heartbeat: Arc<HeartbeatClock>,
}

/// When the registry last pinged this peer.
#[derive(Debug)]
pub struct HeartbeatClock {
    started: Instant,
    last_ping: Mutex<Option<Instant>>,
}

impl HeartbeatClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ping: Mutex::new(None),
        }
    }

    pub fn record_ping(&self) {
        *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn last_ping(&self) -> Option<Instant> {
        *self.last_ping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time since the last ping, or since startup if none has arrived.
    pub fn silence(&self) -> Duration {
        self.last_ping().unwrap_or(self.started).elapsed()
    }
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerNode {
    pub async fn bind(config: PeerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        let advertised = match &config.advertise {
            Some(a) => a.parse()?,
            None => PeerAddr::from(listener.local_addr()?),
        };
        info!(
            addr = %listener.local_addr()?,
            %advertised,
            dir = %config.content_dir.display(),
            "content peer listening"
        );
        Ok(Self {
            listener,
            advertised,
            config,
            heartbeat: Arc::new(HeartbeatClock::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn advertised(&self) -> &PeerAddr {
        &self.advertised
    }

    /// Scan the content directory and send REGISTER. Returns what was advertised.
    pub async fn register_self(&self) -> Result<Snapshot> {
        let snapshot = holdings::scan(&self.config.content_dir)?;
        announce(
            &self.config.registry,
            &Command::Register {
                peer: self.advertised.clone(),
                holdings: snapshot.iter().cloned().collect(),
            },
        )
        .await?;
        info!(registry = %self.config.registry, items = snapshot.len(), "registered");
        Ok(snapshot)
    }

    pub fn heartbeat(&self) -> Arc<HeartbeatClock> {
        Arc::clone(&self.heartbeat)
    }

    pub fn registry_watchdog(&self) -> RegistryWatchdog {
        RegistryWatchdog {
            registry: self.config.registry.clone(),
            advertised: self.advertised.clone(),
            content_dir: self.config.content_dir.clone(),
            silence: self.config.registry_silence(),
            heartbeat: self.heartbeat(),
            last_registered: Instant::now(),
        }
    }

    pub fn directory_watcher(&self, snapshot: Snapshot) -> DirectoryWatcher {
        DirectoryWatcher {
            registry: self.config.registry.clone(),
            advertised: self.advertised.clone(),
            content_dir: self.config.content_dir.clone(),
            interval: self.config.rescan_interval(),
            snapshot,
        }
    }

    /// Register, start the directory watcher and the registry watchdog, then serve
    /// connections until the listener fails.
    pub async fn serve(self) -> Result<()> {
        let snapshot = match self.register_self().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "registration failed; serving anyway");
                holdings::scan(&self.config.content_dir).unwrap_or_default()
            }
        };
        tokio::spawn(self.directory_watcher(snapshot).run());
        tokio::spawn(self.registry_watchdog().run());

        let dir = Arc::new(self.config.content_dir.clone());
        loop {
            let (stream, from) = self.listener.accept().await?;
            let dir = Arc::clone(&dir);
            let heartbeat = self.heartbeat();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, &dir, &heartbeat).await {
                    warn!(%from, error = %e, "peer connection dropped");
                }
            });
        }
    }
}

/// Send a single fire-and-forget command to the registry.
pub async fn announce(registry: &str, cmd: &Command) -> Result<()> {
    let mut stream = connect_registry(registry, REGISTRY_TIMEOUT).await?;
    stream.write_all(cmd.encode().as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Answer heartbeats and range requests on one connection until it closes.
pub async fn serve_connection(
    stream: TcpStream,
    content_dir: &Path,
    heartbeat: &HeartbeatClock,
) -> Result<()> {
    let (rd, mut wr) = stream.into_split();
    let mut rd = BufReader::new(rd);
    while let Some(line) = read_line(&mut rd).await? {
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line)? {
            Command::Ping => {
                heartbeat.record_ping();
                wr.write_all(PONG.as_bytes()).await?;
                wr.write_all(b"\n").await?;
                debug!("answered heartbeat");
            }
            Command::Download { name, part, total } => {
                let sent = serve_range(&mut wr, content_dir, &name, part, total).await?;
                debug!(%name, part, total, bytes = sent, "served range");
            }
            other => {
                return Err(MeshError::Protocol(format!(
                    "peer does not accept {:?}",
                    other.encode().trim_end()
                )));
            }
        }
    }
    Ok(())
}

/// Write the length header and then the bytes of part `part` of `total`.
///
/// A missing file yields `FileNotFound` before anything is written.
pub async fn serve_range<W: AsyncWrite + Unpin>(
    out: &mut W,
    content_dir: &Path,
    name: &str,
    part: u32,
    total: u32,
) -> Result<u64> {
    let path = holdings::resolve(content_dir, name)?;
    let mut file = match File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MeshError::FileNotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(MeshError::FileNotFound(name.to_string()));
    }

    let range = part_range(meta.len(), part, total);
    let len = range.end - range.start;
    file.seek(SeekFrom::Start(range.start)).await?;

    out.write_all(&encode_range_header(len)).await?;
    let copied = copy_exact(&mut file, out, len).await?;
    out.flush().await?;
    if copied != len {
        return Err(MeshError::ShortRange {
            expected: len,
            received: copied,
        });
    }
    Ok(copied)
}

async fn copy_exact<R, W>(src: &mut R, dst: &mut W, len: u64) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut limited = src.take(len);
    tokio::io::copy(&mut limited, dst).await
}

/// Rescans the content directory and sends UPDATE when the holdings change.
pub struct DirectoryWatcher {
    registry: String,
    advertised: PeerAddr,
    content_dir: PathBuf,
    interval: Duration,
    snapshot: Snapshot,
}

impl DirectoryWatcher {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.check().await {
                warn!(error = %e, "holdings update failed; retrying next cycle");
            }
        }
    }

    /// One scan. Returns true when an UPDATE was sent.
    ///
    /// The snapshot only moves forward after the registry accepted the update, so a
    /// failed send is repeated on the next cycle.
    pub async fn check(&mut self) -> Result<bool> {
        let current = holdings::scan(&self.content_dir)?;
        if current == self.snapshot {
            return Ok(false);
        }
        announce(
            &self.registry,
            &Command::Update {
                peer: self.advertised.clone(),
                holdings: current.iter().cloned().collect(),
            },
        )
        .await?;
        info!(
            before = self.snapshot.len(),
            after = current.len(),
            "sent holdings update"
        );
        self.snapshot = current;
        Ok(true)
    }
}

/// Re-sends REGISTER when the registry has gone quiet.
///
/// The registry keeps its table in memory only. After it restarts, a peer whose directory
/// never changes would stay unlisted, so a long gap without heartbeats triggers a fresh
/// registration.
pub struct RegistryWatchdog {
    registry: String,
    advertised: PeerAddr,
    content_dir: PathBuf,
    silence: Duration,
    heartbeat: Arc<HeartbeatClock>,
    last_registered: Instant,
}

impl RegistryWatchdog {
    pub async fn run(mut self) {
        let every = (self.silence / 3).max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.check().await {
                warn!(error = %e, "re-registration failed; retrying next cycle");
            }
        }
    }

    /// Returns true when a REGISTER was sent.
    pub async fn check(&mut self) -> Result<bool> {
        let quiet = self.heartbeat.silence().min(self.last_registered.elapsed());
        if quiet < self.silence {
            return Ok(false);
        }
        warn!(
            registry = %self.registry,
            quiet_secs = quiet.as_secs(),
            "no heartbeat from registry; registering again"
        );
        let holdings = holdings::scan(&self.content_dir)?;
        announce(
            &self.registry,
            &Command::Register {
                peer: self.advertised.clone(),
                holdings: holdings.into_iter().collect(),
            },
        )
        .await?;
        self.last_registered = Instant::now();
        Ok(true)
    }
}
