pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use vidmesh_core::error::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    match cli.command {
        Commands::Query { registry, config } => {
            rt.block_on(handlers::handle_query(registry, config))
        }
        Commands::Get {
            name,
            out,
            peers,
            registry,
            config,
            max_concurrent,
            quiet,
        } => rt.block_on(handlers::handle_get(
            name,
            out,
            peers,
            registry,
            config,
            max_concurrent,
            quiet,
        )),
    }
}
