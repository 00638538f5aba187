//! Discraft - Main entry point.

use anyhow::Result;
use clap::Parser;
use discraft_bot::start_server;
use discraft_common::config::Config;
use discraft_common::logging::init_logging;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "discraft-bot", version, about = "Discord bot for linking Minecraft accounts")]
struct Cli {
    /// Config file (defaults to ~/.discraft/config.json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Validate the configuration and language files, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load_and_validate(cli.config.as_deref())?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Discraft v{}", env!("CARGO_PKG_VERSION"));

    if cli.check {
        discraft_bot::Bot::from_config(&config)?;
        tracing::info!("Configuration OK");
        return Ok(());
    }

    start_server(&config).await
}
