use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vidmesh_core::error::Result;
use vidmesh_net::config::{self, PeerConfig, RegistryConfig};
use vidmesh_net::{PeerNode, RegistryServer};

#[derive(Parser)]
#[command(author, version, about = "vidmesh daemons: registry and content peer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the registry that tracks which peer holds which file
    Registry {
        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Seconds between health rounds
        #[arg(long)]
        health_interval: Option<u64>,
        /// Consecutive failed probes before a peer is dropped
        #[arg(long)]
        eviction_threshold: Option<u32>,
    },

    /// Serve the files of a directory to downloaders
    Peer {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// host:port to advertise; defaults to the bound address
        #[arg(long)]
        advertise: Option<String>,
        /// Registry host:port
        #[arg(long)]
        registry: Option<String>,
        #[arg(long = "dir")]
        content_dir: Option<PathBuf>,
        #[arg(long)]
        rescan_interval: Option<u64>,
        /// Seconds without a registry heartbeat before registering again
        #[arg(long)]
        registry_silence: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    match Cli::parse().command {
        Commands::Registry {
            config,
            listen,
            health_interval,
            eviction_threshold,
        } => {
            let mut cfg: RegistryConfig = config::load(config.as_deref())?;
            if let Some(v) = listen {
                cfg.listen = v;
            }
            if let Some(v) = health_interval {
                cfg.health_interval_secs = v;
            }
            if let Some(v) = eviction_threshold {
                cfg.eviction_threshold = v;
            }
            RegistryServer::bind(cfg).await?.serve().await
        }
        Commands::Peer {
            config,
            listen,
            advertise,
            registry,
            content_dir,
            rescan_interval,
            registry_silence,
        } => {
            let mut cfg: PeerConfig = config::load(config.as_deref())?;
            if let Some(v) = listen {
                cfg.listen = v;
            }
            if advertise.is_some() {
                cfg.advertise = advertise;
            }
            if let Some(v) = registry {
                cfg.registry = v;
            }
            if let Some(v) = content_dir {
                cfg.content_dir = v;
            }
            if let Some(v) = rescan_interval {
                cfg.rescan_interval_secs = v;
            }
            if let Some(v) = registry_silence {
                cfg.registry_silence_secs = v;
            }
            PeerNode::bind(cfg).await?.serve().await
        }
    }
}
