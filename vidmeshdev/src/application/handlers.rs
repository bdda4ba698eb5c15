use std::path::PathBuf;
use std::time::Duration;

use vidmesh_core::catalog::Catalog;
use vidmesh_core::domain::PeerAddr;
use vidmesh_core::error::{MeshError, Result};
use vidmesh_core::progress::ProgressSnapshot;
use vidmesh_net::config::{self, DownloadConfig};
use vidmesh_net::{DownloadSession, query};

const PROGRESS_EVERY: Duration = Duration::from_millis(500);

fn load_config(registry: Option<String>, path: Option<PathBuf>) -> Result<DownloadConfig> {
    let mut cfg: DownloadConfig = config::load(path.as_deref())?;
    if let Some(r) = registry {
        cfg.registry = r;
    }
    Ok(cfg)
}

pub fn render_catalog(catalog: &Catalog) -> String {
    let mut out = String::new();
    for (name, entry) in catalog.iter() {
        let peers: Vec<String> = entry.peers.iter().map(ToString::to_string).collect();
        out.push_str(&format!("{:>12}  {}  [{}]\n", entry.size, name, peers.join(", ")));
    }
    out
}

pub fn render_progress(s: &ProgressSnapshot) -> String {
    let parts: Vec<String> = s.per_part.iter().map(u64::to_string).collect();
    format!(
        "{:>6.1}%  {}/{} bytes  parts [{}]",
        s.fraction() * 100.0,
        s.total,
        s.total_size,
        parts.join(" ")
    )
}

pub async fn handle_query(registry: Option<String>, path: Option<PathBuf>) -> Result<()> {
    let cfg = load_config(registry, path)?;
    let catalog = query(&cfg.registry, cfg.connect_timeout(), cfg.part_read_timeout()).await?;
    if catalog.is_empty() {
        eprintln!("query: registry at {} lists nothing", cfg.registry);
        return Ok(());
    }
    print!("{}", render_catalog(&catalog));
    Ok(())
}

pub async fn handle_get(
    name: String,
    out: Option<PathBuf>,
    peers: Vec<String>,
    registry: Option<String>,
    path: Option<PathBuf>,
    max_concurrent: Option<usize>,
    quiet: bool,
) -> Result<()> {
    let mut cfg = load_config(registry, path)?;
    if let Some(n) = max_concurrent {
        cfg.max_concurrent_fetches = n;
    }
    let chosen = if peers.is_empty() {
        None
    } else {
        Some(
            peers
                .iter()
                .map(|p| p.trim().parse::<PeerAddr>())
                .collect::<Result<Vec<_>>>()?,
        )
    };
    let dest = out.unwrap_or_else(|| PathBuf::from(&name));

    let mut session = DownloadSession::new(cfg);
    session.query().await?;
    let plan = session.plan(&name, chosen)?;
    eprintln!(
        "get: {} ({} bytes) in {} part(s)",
        plan.name(),
        plan.total_size(),
        plan.parts().len()
    );

    let progress = session
        .progress()
        .ok_or_else(|| MeshError::Protocol("no progress after planning".into()))?;
    let ticker = (!quiet).then(|| {
        let progress = progress.clone();
        tokio::spawn(async move {
            let mut every = tokio::time::interval(PROGRESS_EVERY);
            loop {
                every.tick().await;
                eprintln!("{}", render_progress(&progress.snapshot()));
            }
        })
    });

    let result = session.run(&dest).await;
    if let Some(t) = ticker {
        t.abort();
    }
    let file = result?;
    if !quiet {
        eprintln!("{}", render_progress(&progress.snapshot()));
    }
    eprintln!(
        "get: {} -> {} ({} bytes, blake3 {})",
        name,
        file.path.display(),
        file.bytes,
        file.blake3.to_hex()
    );
    Ok(())
}
