//! Common test utilities.
//!
//! Shared helpers for integration tests: temp config files, an in-process
//! server on ephemeral ports and a minimal RESP client.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use bytes::BytesMut;
use livelock::core::config::Config;
use livelock::core::runtime::Runtime;
use livelock::core::time::Clock;
use livelock::protocol::{DecodeResult, RespDecoder, RespEncoder, Value};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// How long a client waits for a reply before the test fails.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Write `content` to a temp config file.
pub fn create_config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Loopback configuration on ephemeral ports.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.server.bind = "127.0.0.1".to_string();
    config.server.port = 0;
    config.telemetry.prometheus_bind = "127.0.0.1".to_string();
    config.telemetry.prometheus_port = 0;
    config
}

/// Loopback configuration with a short grace period.
pub fn test_config_with_grace(grace: Duration) -> Config {
    let mut config = test_config();
    config.session.release_all_timeout_ms = grace.as_millis() as u64;
    config
}

/// An in-process livelock server.
pub struct TestServer {
    pub runtime: Runtime,
}

impl TestServer {
    /// Start a server with `config`.
    pub async fn start(config: Config) -> Self {
        let mut runtime = Runtime::new(config).expect("invalid test config");
        runtime.start_for_tests().await.expect("failed to start");
        Self { runtime }
    }

    /// Start a server reading time from `clock`.
    pub async fn start_with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let mut runtime = Runtime::with_clock(config, clock).expect("invalid test config");
        runtime.start_for_tests().await.expect("failed to start");
        Self { runtime }
    }

    /// Lock protocol address.
    pub fn addr(&self) -> SocketAddr {
        self.runtime.lock_addr().expect("server not started")
    }

    /// Metrics endpoint address.
    pub fn metrics_addr(&self) -> SocketAddr {
        self.runtime.metrics_addr().expect("metrics endpoint disabled")
    }

    /// Connect a new client.
    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.addr()).await
    }

    /// Stop the server.
    pub async fn stop(mut self) {
        self.runtime
            .shutdown_for_tests()
            .await
            .expect("failed to stop");
    }
}

/// Minimal RESP client.
pub struct TestClient {
    stream: TcpStream,
    buf: BytesMut,
    decoder: RespDecoder,
}

impl TestClient {
    /// Connect to `addr`.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        Self {
            stream,
            buf: BytesMut::with_capacity(1024),
            decoder: RespDecoder::new(1 << 20),
        }
    }

    /// Encode `parts` as a command array.
    pub fn encode(parts: &[&str]) -> Vec<u8> {
        RespEncoder::encode(&Value::Array(
            parts
                .iter()
                .map(|p| Value::bulk(p.as_bytes().to_vec()))
                .collect(),
        ))
    }

    /// Send raw bytes.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("Failed to write");
    }

    /// Send a command without waiting for its reply.
    pub async fn send(&mut self, parts: &[&str]) {
        let frame = Self::encode(parts);
        self.send_raw(&frame).await;
    }

    /// Send a command and wait for its reply.
    pub async fn call(&mut self, parts: &[&str]) -> Value {
        self.send(parts).await;
        self.reply()
            .await
            .expect("connection closed before reply")
    }

    /// Read the next reply, or `None` once the server closed the connection.
    pub async fn reply(&mut self) -> Option<Value> {
        tokio::time::timeout(REPLY_TIMEOUT, self.read_reply())
            .await
            .expect("timed out waiting for reply")
    }

    async fn read_reply(&mut self) -> Option<Value> {
        loop {
            match self.decoder.decode_next(&mut self.buf) {
                DecodeResult::Complete(value) => return Some(value),
                DecodeResult::Incomplete => {}
                DecodeResult::Invalid(e) => panic!("server sent invalid frame: {}", e),
            }
            match self.stream.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Session id reported by `HELLO`.
    pub async fn session_id(&mut self) -> String {
        match self.call(&["HELLO"]).await {
            Value::BulkString(id) => String::from_utf8(id.to_vec()).expect("utf-8 session id"),
            other => panic!("unexpected HELLO reply: {:?}", other),
        }
    }

    /// Whether the server has closed this connection.
    pub async fn is_closed(&mut self) -> bool {
        self.reply().await.is_none()
    }
}

/// `*2 :1 ...` reply from a successful ACQUIRE or EXTEND.
pub fn is_granted(value: &Value) -> bool {
    matches!(value, Value::Array(items) if items.first() == Some(&Value::Integer(1)))
}

/// Expiry carried by a granted reply.
pub fn expiry_of(value: &Value) -> Option<f64> {
    match value {
        Value::Array(items) => match items.get(1) {
            Some(Value::Float(f)) => Some(*f),
            _ => None,
        },
        _ => None,
    }
}

/// Issue a plain HTTP GET and return the raw response.
pub async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("Failed to connect");
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream
        .write_all(request.as_bytes())
        .await
        .expect("Failed to write");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("Failed to read");
    response
}
