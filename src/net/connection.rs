//! Connection handler.
//!
//! One handler owns one client stream. It reads into a growable buffer,
//! decodes every complete request in it, dispatches each one against the
//! registry and flushes all replies with a single write. The handler keeps no
//! lock state of its own beyond the session id; when the stream ends for any
//! reason it hands the session to the [`SessionTracker`] instead of releasing
//! anything itself.

use super::tcp::ConnectionId;
use crate::core::error::LivelockError;
use crate::lock::{Lock, SessionId, SessionTracker};
use crate::ops::observability::LockMetrics;
use crate::protocol::{Command, DecodeResult, LockCodec, Value};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

/// Initial read/write buffer capacity.
const BUFFER_CAPACITY: usize = 4096;

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the stream.
    PeerClosed,
    /// Client sent QUIT.
    Quit,
    /// Undecodable input.
    ProtocolError,
    /// Read or write failed.
    TransportError,
    /// Server is shutting down.
    Shutdown,
}

/// Serves one client connection.
pub struct ConnectionHandler {
    id: ConnectionId,
    session: SessionId,
    tracker: Arc<SessionTracker>,
    codec: LockCodec,
    metrics: Arc<LockMetrics>,
}

impl ConnectionHandler {
    /// Create a handler and register a fresh session for it.
    pub fn new(
        id: ConnectionId,
        tracker: Arc<SessionTracker>,
        codec: LockCodec,
        metrics: Arc<LockMetrics>,
    ) -> Self {
        let session = tracker.open();
        Self {
            id,
            session,
            tracker,
            codec,
            metrics,
        }
    }

    /// Connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Session currently bound to this connection.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Execute one command and build its reply.
    pub fn dispatch(&mut self, command: Command) -> Value {
        self.tracker.on_activity(self.session);
        let registry = self.tracker.registry();

        match command {
            Command::Acquire { name, ttl } => {
                match registry.try_acquire(self.session, name, ttl) {
                    Ok(lock) => granted(&lock),
                    Err(LivelockError::AlreadyHeld { .. }) => Value::Null,
                    Err(e) => Value::from_error(&e),
                }
            }
            Command::Release { name } => match registry.release(self.session, &name) {
                Ok(()) => Value::Integer(1),
                Err(LivelockError::NotHolder { .. }) => Value::Integer(0),
                Err(e) => Value::from_error(&e),
            },
            Command::Extend { name, ttl } => match registry.extend(self.session, &name, ttl) {
                Ok(lock) => granted(&lock),
                Err(LivelockError::NotHolder { .. }) => Value::Integer(0),
                Err(e) => Value::from_error(&e),
            },
            Command::Ping { message } => message.map_or_else(Value::pong, Value::BulkString),
            Command::Hello { session: None } => Value::bulk(self.session.to_string()),
            Command::Hello {
                session: Some(token),
            } => match self.tracker.resume(self.session, &token) {
                Ok(resumed) => {
                    self.session = resumed;
                    Value::bulk(resumed.to_string())
                }
                Err(e) => {
                    tracing::debug!(conn = %self.id, error = %e, "session resume refused");
                    Value::Null
                }
            },
            Command::Quit => Value::ok(),
        }
    }

    /// Decode and execute every complete request in `read_buf`, appending
    /// replies to `write_buf`.
    ///
    /// Returns a close reason when the connection must end after the replies
    /// are flushed.
    pub fn process(
        &mut self,
        read_buf: &mut BytesMut,
        write_buf: &mut BytesMut,
    ) -> Option<CloseReason> {
        loop {
            match self.codec.decode(read_buf) {
                DecodeResult::Complete(Ok(command)) => {
                    let quit = matches!(command, Command::Quit);
                    let reply = self.dispatch(command);
                    self.codec.encode(&reply, write_buf);
                    if quit {
                        return Some(CloseReason::Quit);
                    }
                }
                DecodeResult::Complete(Err(e)) if e.is_fatal() => {
                    return Some(self.protocol_error(e, write_buf));
                }
                DecodeResult::Complete(Err(e)) => {
                    self.codec.encode(&Value::from_error(&e), write_buf);
                }
                DecodeResult::Incomplete => return None,
                DecodeResult::Invalid(e) => {
                    return Some(self.protocol_error(e.into(), write_buf));
                }
            }
        }
    }

    /// Serve the connection until it closes or shutdown is signalled.
    pub async fn run<S>(
        mut self,
        mut stream: S,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut read_buf = BytesMut::with_capacity(BUFFER_CAPACITY);
        let mut write_buf = BytesMut::with_capacity(BUFFER_CAPACITY);

        tracing::debug!(
            conn = %self.id,
            session = %self.session,
            protocol = self.codec.protocol_name(),
            "connection opened"
        );

        let reason = loop {
            if *shutdown_rx.borrow_and_update() {
                break CloseReason::Shutdown;
            }

            tokio::select! {
                result = stream.read_buf(&mut read_buf) => {
                    match result {
                        Ok(0) => break CloseReason::PeerClosed,
                        Ok(_) => {
                            let close = self.process(&mut read_buf, &mut write_buf);
                            if !write_buf.is_empty() {
                                if let Err(e) = stream.write_all(&write_buf).await {
                                    tracing::debug!(conn = %self.id, error = %e, "write failed");
                                    break CloseReason::TransportError;
                                }
                                write_buf.clear();
                            }
                            if let Some(reason) = close {
                                break reason;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(conn = %self.id, error = %e, "read failed");
                            break CloseReason::TransportError;
                        }
                    }
                }
                _ = shutdown_rx.changed() => break CloseReason::Shutdown,
            }
        };

        let _ = stream.flush().await;
        let _ = stream.shutdown().await;
        self.close(reason);
        reason
    }

    fn protocol_error(&self, error: LivelockError, write_buf: &mut BytesMut) -> CloseReason {
        tracing::warn!(
            conn = %self.id,
            session = %self.session,
            error = %error,
            "protocol error, closing connection"
        );
        self.metrics.record_protocol_error();
        self.codec.encode(&Value::from_error(&error), write_buf);
        CloseReason::ProtocolError
    }

    fn close(self, reason: CloseReason) {
        tracing::debug!(conn = %self.id, session = %self.session, ?reason, "connection closed");
        self.tracker.on_disconnect(self.session);
        self.metrics.record_connection_closed();
    }
}

/// `[1, expiry]`, with a null expiry for locks without a TTL.
fn granted(lock: &Lock) -> Value {
    let expiry = lock
        .expires_at()
        .map_or(Value::Null, |t| Value::Float(t.as_secs_f64()));
    Value::Array(vec![Value::Integer(1), expiry])
}
