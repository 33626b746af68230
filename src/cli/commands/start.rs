//! Start command implementation.

use super::load_config;
use crate::core::config::ConfigOverrides;
use crate::core::runtime::Runtime;
use anyhow::Result;
use clap::Args;
use std::path::Path;

/// Start the kvbridge server.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Override the listener bind address.
    #[arg(long)]
    pub bind: Option<String>,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` wins over the configured level when it is set.
#[cfg(feature = "telemetry")]
fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
fn init_tracing(_level: &str) {}

/// Run the start command with the given config path.
pub async fn run_start(args: StartArgs, config_path: &Path, log_level: Option<String>) -> Result<()> {
    let overrides = ConfigOverrides {
        log_level,
        bind: args.bind,
    };
    let config = load_config(config_path, &overrides)?;
    init_tracing(&config.telemetry.log_level);

    tracing::info!(config = %config_path.display(), "configuration loaded");

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
