//! OBD-II Diagnostics - Main Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use obd_cli::{execute, init_logging, open, Command};
use obd_service::ObdConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "obd-cli")]
#[command(author, version, about = "OBD-II diagnostics over an ELM327 adapter")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to ./obd.toml when present)
    #[arg(short, long, env = "OBD_CONFIG")]
    config: Option<PathBuf>,

    /// Talk to the built-in simulated vehicle instead of an adapter
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ObdConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log)?;

    info!("=== OBD-II diagnostics v{} ===", env!("CARGO_PKG_VERSION"));

    let service = open(&config, cli.simulate).await?;
    let mut stdout = std::io::stdout().lock();
    let result = execute(&service, &config, &cli.command, &mut stdout).await;

    service.disconnect().await;
    result
}
