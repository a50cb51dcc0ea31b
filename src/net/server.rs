//! Lock protocol server.
//!
//! Accepts connections and serves each one on its own task until shutdown.
//! With `shutdown_support` enabled, shutdown stops accepting, lets every
//! connection finish the batch it is working on and waits for the tasks up
//! to the drain timeout before aborting stragglers. Without it, connection
//! tasks are aborted straight away.

use super::connection::ConnectionHandler;
use super::tcp::{TcpListener, TcpListenerConfig};
use crate::core::config::Config;
use crate::core::error::LivelockResult;
use crate::lock::SessionTracker;
use crate::ops::observability::LockMetrics;
use crate::protocol::LockCodec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Server-side lifecycle settings.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Frame ceiling handed to every connection's codec.
    pub max_payload: usize,
    /// Drain connections on shutdown instead of aborting them.
    pub graceful_shutdown: bool,
    /// Upper bound on the drain.
    pub drain_timeout: Duration,
}

impl ServerOptions {
    /// Derive server options from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_payload: config.server.max_payload,
            graceful_shutdown: config.server.shutdown_support,
            drain_timeout: config.shutdown_drain_timeout(),
        }
    }
}

/// The lock protocol server.
pub struct LockServer {
    listener: TcpListener,
    bound: TokioTcpListener,
    local_addr: SocketAddr,
    options: ServerOptions,
    tracker: Arc<SessionTracker>,
    metrics: Arc<LockMetrics>,
    shutdown_rx: watch::Receiver<bool>,
}

impl LockServer {
    /// Bind the lock protocol port.
    pub async fn bind(
        config: &Config,
        tracker: Arc<SessionTracker>,
        metrics: Arc<LockMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> LivelockResult<Self> {
        let listener = TcpListener::new(
            TcpListenerConfig::from_config(config),
            shutdown_rx.clone(),
            metrics.clone(),
        );
        let bound = listener.bind().await?;
        let local_addr = bound.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            max_payload = config.server.max_payload,
            shutdown_support = config.server.shutdown_support,
            "lock server listening"
        );

        Ok(Self {
            listener,
            bound,
            local_addr,
            options: ServerOptions::from_config(config),
            tracker,
            metrics,
            shutdown_rx,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve connections until shutdown is signalled.
    pub async fn run(self) -> LivelockResult<()> {
        let Self {
            listener,
            bound,
            options,
            tracker,
            metrics,
            shutdown_rx,
            ..
        } = self;
        let mut connections = JoinSet::new();

        loop {
            while connections.try_join_next().is_some() {}

            match listener.accept(&bound).await {
                Ok(Some(conn)) => {
                    tracing::debug!(
                        conn = %conn.id,
                        remote = %conn.remote_addr,
                        "accepted connection"
                    );
                    let handler = ConnectionHandler::new(
                        conn.id,
                        tracker.clone(),
                        LockCodec::new(options.max_payload),
                        metrics.clone(),
                    );
                    let stream = conn.into_stream();
                    let rx = shutdown_rx.clone();
                    connections.spawn(async move {
                        handler.run(stream, rx).await;
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        listener.shutdown();
        drop(bound);

        let open = connections.len();
        if options.graceful_shutdown {
            tracing::info!(
                connections = open,
                timeout_ms = options.drain_timeout.as_millis() as u64,
                "draining connections"
            );
            let drained = tokio::time::timeout(options.drain_timeout, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    remaining = connections.len(),
                    "drain timed out, aborting connections"
                );
            }
        } else if open > 0 {
            tracing::info!(connections = open, "aborting connections");
        }
        connections.shutdown().await;

        listener.stopped();
        tracing::info!("lock server stopped");
        Ok(())
    }
}
