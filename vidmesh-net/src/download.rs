//! Downloader: asks the registry who holds what, fetches one range per peer in parallel,
//! then stitches the parts together.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;
use vidmesh_core::catalog::Catalog;
use vidmesh_core::domain::PeerAddr;
use vidmesh_core::error::{MeshError, Result};
use vidmesh_core::plan::{DownloadPlan, PlannedPart};
use vidmesh_core::progress::DownloadProgress;
use vidmesh_core::reassemble::{ReassembledFile, reassemble};
use vidmesh_core::wire::{Command, RANGE_HEADER_LEN, decode_range_header};

use crate::config::DownloadConfig;
use crate::conn::{connect_peer, connect_registry};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    Queried,
    Planned,
    FetchingParts,
    Reassembling,
    Complete,
    Failed,
}

/// Send QUERY and read the listing until the registry closes the connection.
pub async fn query(registry: &str, connect_timeout: Duration, read_timeout: Duration) -> Result<Catalog> {
    let mut stream = connect_registry(registry, connect_timeout).await?;
    stream.write_all(Command::Query.encode().as_bytes()).await?;

    let mut buf = Vec::new();
    tokio::time::timeout(read_timeout, stream.read_to_end(&mut buf))
        .await
        .map_err(|_| MeshError::RegistryUnreachable {
            addr: registry.to_string(),
            source: std::io::ErrorKind::TimedOut.into(),
        })??;
    let text = String::from_utf8(buf)
        .map_err(|_| MeshError::Protocol("registry listing is not UTF-8".into()))?;
    let catalog = Catalog::from_listing(&text);
    debug!(registry, items = catalog.len(), "queried registry");
    Ok(catalog)
}

/// Outcome of one part fetch.
#[derive(Debug)]
pub struct PartReport {
    pub index: usize,
    pub peer: PeerAddr,
    pub result: Result<PathBuf>,
}

/// Fetch every part of `plan` into `staging`, at most `max_concurrent_fetches` at a time.
///
/// Reports come back in part order, one per part.
pub async fn fetch_all(
    plan: &DownloadPlan,
    staging: &Path,
    progress: Arc<DownloadProgress>,
    config: &DownloadConfig,
) -> Vec<PartReport> {
    let permits = Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1)));
    let total_parts = plan.total_parts();
    let mut set = JoinSet::new();

    for part in plan.parts().iter().cloned() {
        let permits = Arc::clone(&permits);
        let progress = Arc::clone(&progress);
        let name = plan.name().to_string();
        let path = staging.join(format!("part-{:04}", part.index));
        let connect_timeout = config.connect_timeout();
        let read_timeout = config.part_read_timeout();
        let span = info_span!("part", index = part.index, peer = %part.peer);
        set.spawn(
            async move {
                let index = part.index;
                let peer = part.peer.clone();
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        fetch_part(
                            &name,
                            &part,
                            total_parts,
                            &path,
                            &progress,
                            connect_timeout,
                            read_timeout,
                        )
                        .await
                    }
                    Err(_) => Err(MeshError::Protocol("fetch pool closed".into())),
                };
                PartReport { index, peer, result }
            }
            .instrument(span),
        );
    }

    let mut slots: Vec<Option<PartReport>> = (0..plan.parts().len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(report) => {
                let i = report.index;
                slots[i] = Some(report);
            }
            Err(e) => error!(error = %e, "part worker died"),
        }
    }

    plan.parts()
        .iter()
        .zip(slots)
        .map(|(part, slot)| {
            slot.unwrap_or_else(|| PartReport {
                index: part.index,
                peer: part.peer.clone(),
                result: Err(MeshError::Protocol("part worker did not report".into())),
            })
        })
        .collect()
}

/// Fetch one range into `path`. The file is removed again if anything goes wrong.
pub async fn fetch_part(
    name: &str,
    part: &PlannedPart,
    total_parts: u32,
    path: &Path,
    progress: &DownloadProgress,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<PathBuf> {
    let result = fetch_part_inner(
        name,
        part,
        total_parts,
        path,
        progress,
        connect_timeout,
        read_timeout,
    )
    .await;
    match result {
        Ok(bytes) => {
            debug!(bytes, "part complete");
            Ok(path.to_path_buf())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(path).await;
            warn!(error = %e, "part failed");
            Err(e)
        }
    }
}

async fn fetch_part_inner(
    name: &str,
    part: &PlannedPart,
    total_parts: u32,
    path: &Path,
    progress: &DownloadProgress,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<u64> {
    let mut stream = connect_peer(&part.peer, connect_timeout).await?;
    let index = u32::try_from(part.index)
        .map_err(|_| MeshError::Protocol(format!("part index {} out of range", part.index)))?;
    let request = Command::Download {
        name: name.to_string(),
        part: index,
        total: total_parts,
    };
    stream.write_all(request.encode().as_bytes()).await?;

    let timed_out = || MeshError::PeerTimeout {
        peer: part.peer.clone(),
    };

    let mut header = [0u8; RANGE_HEADER_LEN];
    match tokio::time::timeout(read_timeout, stream.read_exact(&mut header)).await {
        Err(_) => return Err(timed_out()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(MeshError::FileNotFound(name.to_string()));
        }
        Ok(Err(e)) => return Err(e.into()),
        Ok(Ok(_)) => {}
    }
    let expected = decode_range_header(header);
    if expected != part.len() {
        return Err(MeshError::Protocol(format!(
            "peer {} offers {expected} bytes for part {}, planned {}",
            part.peer,
            part.index,
            part.len()
        )));
    }

    let mut out = BufWriter::new(File::create(path).await?);
    let mut buf = vec![0u8; READ_CHUNK];
    let mut received = 0u64;
    while received < expected {
        let want = usize::try_from(expected - received).map_or(buf.len(), |r| r.min(buf.len()));
        let n = tokio::time::timeout(read_timeout, stream.read(&mut buf[..want]))
            .await
            .map_err(|_| timed_out())??;
        if n == 0 {
            return Err(MeshError::ShortRange { expected, received });
        }
        out.write_all(&buf[..n]).await?;
        received += n as u64;
        progress.record(part.index, n as u64);
    }
    out.flush().await?;
    out.into_inner().sync_all().await?;
    Ok(received)
}

/// One download from query to finished file.
pub struct DownloadSession {
    config: DownloadConfig,
    id: Uuid,
    state: watch::Sender<DownloadState>,
    catalog: Option<Catalog>,
    plan: Option<DownloadPlan>,
    progress: Option<Arc<DownloadProgress>>,
}

impl DownloadSession {
    pub fn new(config: DownloadConfig) -> Self {
        let (state, _) = watch::channel(DownloadState::Idle);
        Self {
            config,
            id: Uuid::new_v4(),
            state,
            catalog: None,
            plan: None,
            progress: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> DownloadState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadState> {
        self.state.subscribe()
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    pub fn plan_ref(&self) -> Option<&DownloadPlan> {
        self.plan.as_ref()
    }

    /// Live counters for the current plan; `None` before planning.
    pub fn progress(&self) -> Option<Arc<DownloadProgress>> {
        self.progress.clone()
    }

    fn set(&self, next: DownloadState) {
        let prev = self.state.send_replace(next);
        debug!(session = %self.id, ?prev, ?next, "state change");
    }

    fn fail<T>(&self, e: MeshError) -> Result<T> {
        self.set(DownloadState::Failed);
        Err(e)
    }

    pub async fn query(&mut self) -> Result<&Catalog> {
        match query(
            &self.config.registry,
            self.config.connect_timeout(),
            self.config.part_read_timeout(),
        )
        .await
        {
            Ok(catalog) => {
                self.set(DownloadState::Queried);
                Ok(self.catalog.insert(catalog))
            }
            Err(e) => self.fail(e),
        }
    }

    /// Build the plan for `name`. With `peers` unset every listed holder serves one part;
    /// the order of `peers` decides which peer serves which part.
    pub fn plan(&mut self, name: &str, peers: Option<Vec<PeerAddr>>) -> Result<&DownloadPlan> {
        let Some(entry) = self.catalog.as_ref().and_then(|c| c.get(name)) else {
            return self.fail(MeshError::UnknownContent(name.to_string()));
        };
        let size = entry.size;
        let chosen = peers.unwrap_or_else(|| entry.peers.clone());
        match DownloadPlan::new(name, size, chosen) {
            Ok(plan) => Ok(self.use_plan(plan)),
            Err(e) => self.fail(e),
        }
    }

    /// Adopt a plan built elsewhere.
    pub fn use_plan(&mut self, plan: DownloadPlan) -> &DownloadPlan {
        self.progress = Some(Arc::new(DownloadProgress::new(
            plan.parts().len(),
            plan.total_size(),
        )));
        self.set(DownloadState::Planned);
        info!(
            session = %self.id,
            name = plan.name(),
            size = plan.total_size(),
            parts = plan.parts().len(),
            "download planned"
        );
        self.plan.insert(plan)
    }

    /// Fetch every part of the current plan into `staging`.
    pub async fn execute(&mut self, staging: &Path) -> Result<Vec<PartReport>> {
        let (Some(plan), Some(progress)) = (self.plan.as_ref(), self.progress.clone()) else {
            return self.fail(MeshError::Protocol("execute called before plan".into()));
        };
        self.set(DownloadState::FetchingParts);
        let span = info_span!("download", session = %self.id, name = plan.name());
        let reports = fetch_all(plan, staging, progress, &self.config)
            .instrument(span)
            .await;
        Ok(reports)
    }

    /// Join the fetched parts into `dest`. Fails with `MissingParts` if any part failed.
    pub async fn reassemble(&mut self, reports: Vec<PartReport>, dest: &Path) -> Result<ReassembledFile> {
        let Some(plan) = self.plan.clone() else {
            return self.fail(MeshError::Protocol("reassemble called before plan".into()));
        };
        self.set(DownloadState::Reassembling);
        let part_files: Vec<Option<PathBuf>> = reports.into_iter().map(|r| r.result.ok()).collect();
        let dest = dest.to_path_buf();
        let joined =
            tokio::task::spawn_blocking(move || reassemble(&plan, &part_files, &dest)).await;
        let result = match joined {
            Ok(r) => r,
            Err(e) => Err(MeshError::Io(std::io::Error::other(e))),
        };
        match result {
            Ok(file) => {
                self.set(DownloadState::Complete);
                info!(
                    session = %self.id,
                    path = %file.path.display(),
                    bytes = file.bytes,
                    blake3 = %file.blake3.to_hex(),
                    "download complete"
                );
                Ok(file)
            }
            Err(e) => {
                error!(session = %self.id, error = %e, "reassembly failed");
                self.fail(e)
            }
        }
    }

    /// Query, plan, fetch and reassemble `name` into `dest`.
    pub async fn download(
        &mut self,
        name: &str,
        peers: Option<Vec<PeerAddr>>,
        dest: &Path,
    ) -> Result<ReassembledFile> {
        if self.catalog.is_none() {
            self.query().await?;
        }
        self.plan(name, peers)?;
        self.run(dest).await
    }

    /// Fetch and reassemble the current plan into `dest`, staging parts in a temporary
    /// directory that is removed afterwards.
    pub async fn run(&mut self, dest: &Path) -> Result<ReassembledFile> {
        let staging_root = match &self.config.staging_dir {
            Some(d) => d.clone(),
            None => match dest.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };
        if let Err(e) = tokio::fs::create_dir_all(&staging_root).await {
            return self.fail(e.into());
        }
        let staging = match tempfile::Builder::new()
            .prefix(".vidmesh-")
            .tempdir_in(&staging_root)
        {
            Ok(d) => d,
            Err(e) => return self.fail(e.into()),
        };

        let reports = self.execute(staging.path()).await?;
        self.reassemble(reports, dest).await
    }
}
