mod application;
mod presentation;

use tracing_subscriber::EnvFilter;
use vidmesh_core::error::Result;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
    application::run()
}
