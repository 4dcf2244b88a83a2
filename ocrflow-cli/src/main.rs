//! ABOUTME: ocrflow command-line entry point
//! ABOUTME: Wires settings, stores, registry, engine, and task runner once, then dispatches

mod bootstrap;
mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    cli::run(cli).await
}
