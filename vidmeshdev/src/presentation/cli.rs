use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "vidmesh client CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List what the registry knows about
    Query {
        /// Registry host:port
        #[arg(long)]
        registry: Option<String>,
        /// JSON download config
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Download a file from the peers holding it
    Get {
        name: String,
        /// Output path; defaults to the name in the current directory
        #[arg(long)]
        out: Option<PathBuf>,
        /// Comma-separated host:port list, one part per entry (default: every holder)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,
        #[arg(long)]
        registry: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Fetch at most this many parts at once
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Hide progress output
        #[arg(long)]
        quiet: bool,
    },
}
