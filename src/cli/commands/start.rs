//! Start command implementation.

use super::load_config;
use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the lock server.
#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Lock listener bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Lock listener port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Metrics endpoint port.
    #[arg(long)]
    pub prometheus_port: Option<u16>,

    /// Drain connections on shutdown instead of dropping them.
    #[arg(long)]
    pub shutdown_support: bool,
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
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

/// Resolve the effective configuration: file, then environment, then flags.
pub fn resolve_config(
    config_path: Option<&Path>,
    log_level: Option<String>,
    args: &StartArgs,
) -> Result<Config> {
    let mut config = load_config(config_path)?;
    config
        .apply_env()
        .context("invalid LIVELOCK_* environment override")?;
    config.apply_overrides(&ConfigOverrides {
        log_level,
        bind: args.bind.clone(),
        port: args.port,
        prometheus_port: args.prometheus_port,
        shutdown_support: args.shutdown_support,
    });
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Run the start command.
pub async fn run_start(
    args: StartArgs,
    config_path: Option<&Path>,
    log_level: Option<String>,
) -> Result<()> {
    let config = resolve_config(config_path, log_level, &args)?;
    init_tracing(&config.telemetry.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr(),
        metrics_enabled = config.telemetry.metrics_enabled,
        "starting livelock"
    );

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9100\n\n[telemetry]\nlog_level = \"warn\"").unwrap();

        let args = StartArgs {
            port: Some(9200),
            shutdown_support: true,
            ..Default::default()
        };
        let config = resolve_config(Some(file.path()), Some("debug".to_string()), &args).unwrap();
        assert_eq!(config.server.port, 9200);
        assert!(config.server.shutdown_support);
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_invalid_override_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = resolve_config(
            Some(file.path()),
            Some("loud".to_string()),
            &StartArgs::default(),
        );
        assert!(result.is_err());
    }
}
