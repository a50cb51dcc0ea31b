//! Configuration parsing and validation.
//!
//! Livelock configuration is loaded from a TOML file, then overridden by
//! `LIVELOCK_*` environment variables and finally by CLI flags. Every field
//! has a default, so an empty file (or no file at all) is a valid
//! configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level Livelock configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Lock protocol listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session grace policy.
    #[serde(default)]
    pub session: SessionConfig,

    /// TCP keepalive applied to accepted sockets.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,

    /// Lock registry housekeeping.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Metrics endpoint and logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Lock protocol listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Listen port; 0 picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum size of a single request frame in bytes.
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,

    /// Maximum lock name length in bytes.
    #[serde(default = "default_max_lock_name_len")]
    pub max_lock_name_len: usize,

    /// Drain in-flight connections on shutdown instead of dropping them.
    #[serde(default)]
    pub shutdown_support: bool,

    /// Upper bound on the graceful drain.
    #[serde(default = "default_shutdown_drain_timeout_ms")]
    pub shutdown_drain_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_payload: default_max_payload(),
            max_lock_name_len: default_max_lock_name_len(),
            shutdown_support: false,
            shutdown_drain_timeout_ms: default_shutdown_drain_timeout_ms(),
        }
    }
}

/// Session grace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a disconnected session keeps its locks.
    #[serde(default = "default_release_all_timeout_ms")]
    pub release_all_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            release_all_timeout_ms: default_release_all_timeout_ms(),
        }
    }
}

/// TCP keepalive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Idle time before the first probe.
    #[serde(default = "default_keepalive_time_secs")]
    pub time_secs: u64,

    /// Interval between probes.
    #[serde(default = "default_keepalive_interval_secs")]
    pub interval_secs: u64,

    /// Unanswered probes before the peer is declared dead.
    #[serde(default = "default_keepalive_probes")]
    pub probes: u32,

    /// Set TCP_NODELAY on accepted sockets.
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            time_secs: default_keepalive_time_secs(),
            interval_secs: default_keepalive_interval_secs(),
            probes: default_keepalive_probes(),
            nodelay: default_nodelay(),
        }
    }
}

/// Registry housekeeping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Period of the expired-record sweep; 0 disables it.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Serve the Prometheus endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,

    /// Metrics HTTP bind address.
    #[serde(default = "default_bind")]
    pub prometheus_bind: String,

    /// Metrics HTTP port.
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
            prometheus_bind: default_bind(),
            prometheus_port: default_prometheus_port(),
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7873
}

fn default_max_payload() -> usize {
    1024
}

fn default_max_lock_name_len() -> usize {
    256
}

fn default_shutdown_drain_timeout_ms() -> u64 {
    5_000
}

fn default_release_all_timeout_ms() -> u64 {
    5_000
}

fn default_keepalive_time_secs() -> u64 {
    60
}

fn default_keepalive_interval_secs() -> u64 {
    10
}

fn default_keepalive_probes() -> u32 {
    10
}

fn default_nodelay() -> bool {
    true
}

fn default_sweep_interval_ms() -> u64 {
    30_000
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_prometheus_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).with_context(|| "failed to serialize config")
    }

    /// Apply `LIVELOCK_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `LIVELOCK_*` overrides using `lookup` to resolve variables.
    ///
    /// Durations are given in seconds and may be fractional.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(bind) = lookup("LIVELOCK_BIND_TO") {
            self.server.bind = bind;
        }
        if let Some(port) = lookup("LIVELOCK_PORT") {
            self.server.port = parse_env("LIVELOCK_PORT", &port)?;
        }
        if let Some(secs) = lookup("LIVELOCK_RELEASE_ALL_TIMEOUT") {
            self.session.release_all_timeout_ms =
                secs_to_ms("LIVELOCK_RELEASE_ALL_TIMEOUT", &secs)?;
        }
        if let Some(max) = lookup("LIVELOCK_MAX_PAYLOAD") {
            self.server.max_payload = parse_env("LIVELOCK_MAX_PAYLOAD", &max)?;
        }
        if let Some(flag) = lookup("LIVELOCK_SHUTDOWN_SUPPORT") {
            self.server.shutdown_support = parse_bool("LIVELOCK_SHUTDOWN_SUPPORT", &flag)?;
        }
        if let Some(port) = lookup("LIVELOCK_PROMETHEUS_PORT") {
            self.telemetry.prometheus_port = parse_env("LIVELOCK_PROMETHEUS_PORT", &port)?;
        }
        if let Some(secs) = lookup("LIVELOCK_TCP_KEEPALIVE_TIME") {
            self.keepalive.time_secs = secs_to_ms("LIVELOCK_TCP_KEEPALIVE_TIME", &secs)? / 1000;
        }
        if let Some(secs) = lookup("LIVELOCK_TCP_KEEPALIVE_INTERVAL") {
            self.keepalive.interval_secs =
                secs_to_ms("LIVELOCK_TCP_KEEPALIVE_INTERVAL", &secs)? / 1000;
        }
        if let Some(probes) = lookup("LIVELOCK_TCP_KEEPALIVE_PROBES") {
            self.keepalive.probes = parse_env("LIVELOCK_TCP_KEEPALIVE_PROBES", &probes)?;
        }
        if let Some(level) = lookup("LIVELOCK_LOG_LEVEL") {
            self.telemetry.log_level = level.to_ascii_lowercase();
        }
        Ok(())
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref bind) = overrides.bind {
            self.server.bind = bind.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(port) = overrides.prometheus_port {
            self.telemetry.prometheus_port = port;
        }
        if overrides.shutdown_support {
            self.server.shutdown_support = true;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_server()?;
        self.validate_session()?;
        self.validate_keepalive()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<()> {
        if self.server.bind.is_empty() {
            anyhow::bail!("server.bind must not be empty");
        }

        // Smallest frame worth accepting: `*1\r\n$4\r\nPING\r\n` plus headroom.
        if self.server.max_payload < 16 {
            anyhow::bail!(
                "server.max_payload must be >= 16, got: {}",
                self.server.max_payload
            );
        }

        if self.server.max_lock_name_len == 0 {
            anyhow::bail!("server.max_lock_name_len must be > 0");
        }

        if self.server.max_lock_name_len >= self.server.max_payload {
            anyhow::bail!(
                "server.max_lock_name_len ({}) must be smaller than server.max_payload ({})",
                self.server.max_lock_name_len,
                self.server.max_payload
            );
        }

        Ok(())
    }

    fn validate_session(&self) -> Result<()> {
        if self.session.release_all_timeout_ms == 0 {
            anyhow::bail!("session.release_all_timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_keepalive(&self) -> Result<()> {
        if self.keepalive.probes == 0 {
            anyhow::bail!("keepalive.probes must be > 0");
        }
        if self.keepalive.time_secs == 0 || self.keepalive.interval_secs == 0 {
            anyhow::bail!("keepalive.time_secs and keepalive.interval_secs must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                VALID_LOG_LEVELS,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    /// Lock protocol listen address (`bind:port`).
    pub fn listen_addr(&self) -> String {
        join_host_port(&self.server.bind, self.server.port)
    }

    /// Metrics endpoint listen address (`bind:port`).
    pub fn metrics_addr(&self) -> String {
        join_host_port(&self.telemetry.prometheus_bind, self.telemetry.prometheus_port)
    }

    /// Grace period for disconnected sessions.
    pub fn release_all_timeout(&self) -> Duration {
        Duration::from_millis(self.session.release_all_timeout_ms)
    }

    /// Upper bound on the graceful drain.
    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_drain_timeout_ms)
    }

    /// Sweep period, `None` when the sweep is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.registry.sweep_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, value, e))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("{} has invalid boolean '{}'", key, value),
    }
}

fn secs_to_ms(key: &str, value: &str) -> Result<u64> {
    let secs: f64 = parse_env(key, value)?;
    if !secs.is_finite() || secs < 0.0 {
        anyhow::bail!("{} must be a non-negative number of seconds, got '{}'", key, value);
    }
    Ok((secs * 1000.0).round() as u64)
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override lock listener bind address.
    pub bind: Option<String>,
    /// Override lock listener port.
    pub port: Option<u16>,
    /// Override metrics port.
    pub prometheus_port: Option<u16>,
    /// Force graceful shutdown on.
    pub shutdown_support: bool,
}
