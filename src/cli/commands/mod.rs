//! CLI command implementations.

mod config;
mod start;

pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use start::{run_start, StartArgs};

use crate::core::config::Config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "config/livelock.toml";

/// Load configuration from `path`, or from [`DEFAULT_CONFIG_PATH`] when
/// absent. A missing default file yields the built-in defaults; a missing
/// explicit file is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };

    if !explicit && !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }

    Config::from_file(&path).with_context(|| format!("failed to load config from {:?}", path))
}
