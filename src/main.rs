//! Livelock - CLI entrypoint.
//!
//! Usage:
//!   livelock start [--port 7873] [--shutdown-support]
//!   livelock --config config/livelock.toml config validate
//!   livelock config generate --output config/livelock.toml

use anyhow::Result;
use clap::Parser;
use livelock::cli::commands::{run_config, run_start};
use livelock::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.map(PathBuf::from);

    match cli.command {
        Commands::Start(args) => run_start(args, config_path.as_deref(), cli.log_level).await,
        Commands::Config(args) => run_config(args, config_path.as_deref()),
    }
}
