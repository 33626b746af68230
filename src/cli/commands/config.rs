//! Config command implementation.

use super::load_config;
use crate::core::config::ConfigOverrides;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate,
    /// Print configuration with defaults.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs, config_path: &Path, log_level: Option<String>) -> Result<()> {
    let overrides = ConfigOverrides {
        log_level,
        bind: None,
    };
    match args.command {
        ConfigCommand::Validate => validate_config(config_path, &overrides),
        ConfigCommand::Show { format } => show_config(config_path, &overrides, &format),
    }
}

fn validate_config(path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(path, overrides)?;
    println!("✓ {} is valid", path.display());
    println!("  listener: {}", config.listener.bind);
    println!("  backend:  {}", config.backend.mode);
    Ok(())
}

fn show_config(path: &Path, overrides: &ConfigOverrides, format: &str) -> Result<()> {
    let config = load_config(path, overrides)?;
    let rendered = match format {
        "json" => serde_json::to_string_pretty(&config)?,
        "toml" => config.to_toml()?,
        other => anyhow::bail!("unknown format '{}', expected toml or json", other),
    };
    println!("{}", rendered);
    Ok(())
}
