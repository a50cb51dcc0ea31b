//! TCP listener.
//!
//! Binds the lock protocol port, accepts connections under a shutdown
//! signal and applies socket options (nodelay, keepalive probes) to every
//! accepted stream. Keepalive is how dead or partitioned peers are noticed:
//! once the probes go unanswered the kernel fails the socket, the read loop
//! ends and the session enters its grace period.

use crate::core::config::Config;
use crate::core::error::{LivelockError, LivelockResult};
use crate::ops::observability::LockMetrics;
use parking_lot::RwLock;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::watch;

/// Keepalive probe settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSettings {
    /// Idle time before the first probe.
    pub time: Duration,
    /// Interval between probes.
    pub interval: Duration,
    /// Unanswered probes before the connection is dropped.
    pub probes: u32,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            time: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            probes: 10,
        }
    }
}

/// Socket settings for the lock protocol listener.
#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    /// `host:port` to bind.
    pub bind_addr: String,
    /// Set `TCP_NODELAY` on accepted sockets.
    pub nodelay: bool,
    pub keepalive: KeepaliveSettings,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7873".to_string(),
            nodelay: true,
            keepalive: KeepaliveSettings::default(),
        }
    }
}

impl TcpListenerConfig {
    /// Derive the listener settings from the service configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            bind_addr: config.listen_addr(),
            nodelay: config.keepalive.nodelay,
            keepalive: KeepaliveSettings {
                time: Duration::from_secs(config.keepalive.time_secs),
                interval: Duration::from_secs(config.keepalive.interval_secs),
                probes: config.keepalive.probes,
            },
        }
    }
}

/// Listener lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpListenerState {
    Created,
    Listening,
    /// No further connections are handed out.
    ShuttingDown,
    Stopped,
}

/// Per-process connection number, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A configured, accepted client socket.
#[derive(Debug)]
pub struct TcpConnection {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    stream: TcpStream,
}

impl TcpConnection {
    /// Hand the socket to a connection handler.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

/// Enable keepalive probes on `stream`.
pub fn apply_keepalive(stream: &TcpStream, settings: &KeepaliveSettings) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(settings.time);

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        windows
    ))]
    let keepalive = keepalive.with_interval(settings.interval);

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd"
    ))]
    let keepalive = keepalive.with_retries(settings.probes);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Lock protocol listener: binds, accepts under the shutdown signal and
/// applies socket options.
pub struct TcpListener {
    config: TcpListenerConfig,
    state: RwLock<TcpListenerState>,
    next_conn_id: AtomicU64,
    shutdown_rx: watch::Receiver<bool>,
    metrics: Arc<LockMetrics>,
}

impl TcpListener {
    pub fn new(
        config: TcpListenerConfig,
        shutdown_rx: watch::Receiver<bool>,
        metrics: Arc<LockMetrics>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(TcpListenerState::Created),
            next_conn_id: AtomicU64::new(1),
            shutdown_rx,
            metrics,
        }
    }

    pub fn state(&self) -> TcpListenerState {
        *self.state.read()
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> LivelockResult<TokioTcpListener> {
        let listener = TokioTcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| {
                LivelockError::internal(format!(
                    "failed to bind to {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        *self.state.write() = TcpListenerState::Listening;
        Ok(listener)
    }

    /// Accept a connection.
    ///
    /// Returns `Ok(None)` once shutdown has been signalled.
    pub async fn accept(
        &self,
        listener: &TokioTcpListener,
    ) -> LivelockResult<Option<TcpConnection>> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let closing = matches!(
            self.state(),
            TcpListenerState::ShuttingDown | TcpListenerState::Stopped
        );
        if closing || *shutdown_rx.borrow_and_update() {
            return Ok(None);
        }

        tokio::select! {
            result = listener.accept() => {
                let (stream, addr) = result?;
                if self.config.nodelay {
                    let _ = stream.set_nodelay(true);
                }
                let id = ConnectionId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
                if let Err(e) = apply_keepalive(&stream, &self.config.keepalive) {
                    tracing::warn!(conn = %id, error = %e, "failed to enable tcp keepalive");
                }

                self.metrics.record_connection_opened();
                Ok(Some(TcpConnection { id, remote_addr: addr, stream }))
            }
            _ = shutdown_rx.changed() => {
                Ok(None)
            }
        }
    }

    /// Stop handing out connections.
    pub fn shutdown(&self) {
        *self.state.write() = TcpListenerState::ShuttingDown;
    }

    /// Record that the socket has been closed.
    pub fn stopped(&self) {
        *self.state.write() = TcpListenerState::Stopped;
    }
}
