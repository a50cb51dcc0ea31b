//! Config command implementation.

use super::load_config;
use crate::core::config::Config;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration file, environment overrides included.
    Validate,
    /// Print the effective configuration.
    Show {
        /// Output format (toml).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Write a configuration file with every default spelled out.
    Generate {
        /// Output file path (stdout when omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => {
            effective_config(config_path)?;
            println!("configuration is valid");
            Ok(())
        }
        ConfigCommand::Show { format } => {
            let config = effective_config(config_path)?;
            print!("{}", render(&config, &format)?);
            Ok(())
        }
        ConfigCommand::Generate { output } => generate_config(output.as_deref()),
    }
}

fn effective_config(config_path: Option<&Path>) -> Result<Config> {
    let mut config = load_config(config_path)?;
    config
        .apply_env()
        .context("invalid LIVELOCK_* environment override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn render(config: &Config, format: &str) -> Result<String> {
    match format {
        "toml" => config.to_toml(),
        other => anyhow::bail!("unsupported format '{}' (expected toml)", other),
    }
}

fn generate_config(output: Option<&Path>) -> Result<()> {
    let template = Config::default().to_toml()?;

    match output {
        Some(path) => {
            std::fs::write(path, &template)
                .with_context(|| format!("failed to write {:?}", path))?;
            println!("generated config template: {:?}", path);
        }
        None => print!("{}", template),
    }

    Ok(())
}
