//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: registry → session tracker → metrics endpoint → sweeper → lock server
//! - Shutdown order: health probe → lock server → sweeper → metrics endpoint → grace timers

use crate::core::config::Config;
use crate::core::error::LivelockResult;
use crate::core::time::{Clock, SystemClock};
use crate::lock::{LockRegistry, SessionTracker};
use crate::net::LockServer;
use crate::ops::{HealthProbe, LockMetrics, MetricsServer};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// How long `stop` waits for each background task.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Livelock runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Time source for lock expiry.
    clock: Arc<dyn Clock>,

    /// Service metrics.
    metrics: Arc<LockMetrics>,

    /// Health reported on `/healthz`.
    health: Arc<HealthProbe>,

    /// Session tracker (owns the registry).
    tracker: Option<Arc<SessionTracker>>,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,

    /// Bound lock protocol address.
    lock_addr: Option<SocketAddr>,

    /// Bound metrics address.
    metrics_addr: Option<SocketAddr>,

    server_handle: Option<JoinHandle<LivelockResult<()>>>,
    metrics_handle: Option<JoinHandle<LivelockResult<()>>>,
    sweeper_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a runtime reading time from `clock`.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config: Arc::new(config),
            clock,
            metrics: Arc::new(LockMetrics::new()),
            health: Arc::new(HealthProbe::new()),
            tracker: None,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            lock_addr: None,
            metrics_addr: None,
            server_handle: None,
            metrics_handle: None,
            sweeper_handle: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Service metrics.
    pub fn metrics(&self) -> &Arc<LockMetrics> {
        &self.metrics
    }

    /// The lock registry (once started).
    pub fn registry(&self) -> Option<&Arc<LockRegistry>> {
        self.tracker.as_ref().map(|t| t.registry())
    }

    /// Address the lock server is bound to (once started).
    pub fn lock_addr(&self) -> Option<SocketAddr> {
        self.lock_addr
    }

    /// Address the metrics endpoint is bound to, if enabled and started.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Initialize and start all runtime components.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            addr = %self.config.listen_addr(),
            release_all_timeout_ms = self.config.session.release_all_timeout_ms,
            "starting livelock runtime"
        );

        let registry = Arc::new(LockRegistry::new(
            self.clock.clone(),
            self.metrics.clone(),
            self.config.server.max_lock_name_len,
        ));
        let tracker = Arc::new(SessionTracker::new(
            registry,
            self.config.release_all_timeout(),
        ));
        self.tracker = Some(tracker.clone());

        self.start_metrics_server().await?;
        self.start_sweeper(&tracker);

        let server = LockServer::bind(
            &self.config,
            tracker,
            self.metrics.clone(),
            self.shutdown_rx.clone(),
        )
        .await
        .context("failed to start lock server")?;
        self.lock_addr = Some(server.local_addr());
        self.server_handle = Some(tokio::spawn(server.run()));

        self.running.store(true, Ordering::Release);
        tracing::info!("livelock runtime started");
        Ok(())
    }

    async fn start_metrics_server(&mut self) -> Result<()> {
        if !self.config.telemetry.metrics_enabled {
            tracing::debug!("metrics endpoint disabled");
            return Ok(());
        }

        let server = MetricsServer::bind(
            &self.config.metrics_addr(),
            self.metrics.clone(),
            self.health.clone(),
            self.shutdown_rx.clone(),
        )
        .await
        .context("failed to start metrics endpoint")?;
        self.metrics_addr = Some(server.local_addr());
        self.metrics_handle = Some(tokio::spawn(server.run()));
        Ok(())
    }

    fn start_sweeper(&mut self, tracker: &Arc<SessionTracker>) {
        let Some(period) = self.config.sweep_interval() else {
            tracing::debug!("expiry sweep disabled");
            return;
        };

        let registry = tracker.registry().clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        self.sweeper_handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = registry.sweep_expired();
                        tracing::debug!(purged, locks = registry.lock_count(), "expiry sweep");
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        }));
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&mut self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until SIGINT or a shutdown request.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await
    }

    /// Stop all runtime components.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping livelock runtime");
        self.running.store(false, Ordering::Release);
        self.health.mark_shutting_down();

        let _ = self.shutdown_tx.send(true);

        // The server bounds its own drain; allow it that long plus slack.
        let server_timeout = self.config.shutdown_drain_timeout() + TASK_STOP_TIMEOUT;
        stop_task("lock server", self.server_handle.take(), server_timeout).await;
        if let Some(handle) = self.sweeper_handle.take() {
            handle.abort();
        }
        stop_task("metrics endpoint", self.metrics_handle.take(), TASK_STOP_TIMEOUT).await;

        if let Some(tracker) = self.tracker.as_ref() {
            tracker.shutdown();
        }

        tracing::info!("livelock runtime stopped");
        Ok(())
    }

    /// Start the runtime for tests (without signal handling).
    pub async fn start_for_tests(&mut self) -> Result<()> {
        self.start().await
    }

    /// Stop the runtime for tests.
    pub async fn shutdown_for_tests(&mut self) -> Result<()> {
        self.stop().await
    }
}

async fn stop_task(
    name: &str,
    handle: Option<JoinHandle<LivelockResult<()>>>,
    timeout: Duration,
) {
    let Some(handle) = handle else {
        return;
    };

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(()))) => {
            tracing::debug!(task = name, "stopped");
        }
        Ok(Ok(Err(e))) => {
            tracing::warn!(task = name, error = %e, "stopped with error");
        }
        Ok(Err(e)) => {
            tracing::warn!(task = name, error = %e, "task panicked");
        }
        Err(_) => {
            tracing::warn!(task = name, "stop timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.bind = "127.0.0.1".to_string();
        config.server.port = 0;
        config.telemetry.prometheus_bind = "127.0.0.1".to_string();
        config.telemetry.prometheus_port = 0;
        config
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = test_config();
        config.session.release_all_timeout_ms = 0;
        assert!(Runtime::new(config).is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut runtime = Runtime::new(test_config()).unwrap();
        assert!(!runtime.is_running());
        assert!(runtime.lock_addr().is_none());

        runtime.start_for_tests().await.unwrap();
        assert!(runtime.is_running());
        assert!(runtime.lock_addr().is_some());
        assert!(runtime.metrics_addr().is_some());
        assert_eq!(runtime.registry().unwrap().lock_count(), 0);

        runtime.shutdown_for_tests().await.unwrap();
        assert!(!runtime.is_running());
        assert!(*runtime.shutdown_receiver().borrow());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_optional() {
        let mut config = test_config();
        config.telemetry.metrics_enabled = false;
        let mut runtime = Runtime::new(config).unwrap();
        runtime.start_for_tests().await.unwrap();
        assert!(runtime.metrics_addr().is_none());
        runtime.shutdown_for_tests().await.unwrap();
    }
}
