//! kvbridge - unified CLI entrypoint.
//!
//! Usage:
//!   kvbridge start [--bind ADDR] [--config config/kvbridge.toml]
//!   kvbridge config validate [--config PATH]
//!   kvbridge config show [--format toml|json]

use anyhow::Result;
use clap::Parser;
use kvbridge::cli::commands::{run_config, run_start};
use kvbridge::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = PathBuf::from(&cli.config);

    match cli.command {
        Commands::Start(args) => run_start(args, &config_path, cli.log_level).await,
        Commands::Config(args) => run_config(args, &config_path, cli.log_level),
    }
}
