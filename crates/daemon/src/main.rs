//! RibbonWorm node binary
//!
//! Runs discovery, the relay and the connection manager until Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use ribbonworm_daemon::NodeService;

#[derive(Parser)]
#[command(name = "ribbonworm")]
#[command(about = "LAN peer discovery and one-hop relay node")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging for RibbonWorm crates
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    ribbonworm_logging::init_logging(cli.verbose);

    let mut node = NodeService::load(cli.config.as_deref()).context("Failed to load settings")?;

    if let Err(e) = node.start().await {
        tracing::error!("Failed to start node: {}", e);
        return Err(e).context("Node startup failed");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Received shutdown signal");

    node.shutdown().await;
    Ok(())
}
