//! Prometheus metrics endpoint.
//!
//! Serves `GET /metrics` (text exposition of [`LockMetrics`]) and
//! `GET /healthz` over HTTP/1.1. Read-only; a failed scrape never affects
//! the lock service.

use super::observability::{HealthProbe, LockMetrics};
use crate::core::error::{LivelockError, LivelockResult};
use bytes::Bytes;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

type Body = http_body_util::Full<Bytes>;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// HTTP server exposing metrics and health.
pub struct MetricsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    metrics: Arc<LockMetrics>,
    health: Arc<HealthProbe>,
    shutdown_rx: watch::Receiver<bool>,
}

impl MetricsServer {
    /// Bind the metrics endpoint.
    pub async fn bind(
        addr: &str,
        metrics: Arc<LockMetrics>,
        health: Arc<HealthProbe>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> LivelockResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            LivelockError::internal(format!("failed to bind metrics endpoint {}: {}", addr, e))
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "metrics endpoint listening");

        Ok(Self {
            listener,
            local_addr,
            metrics,
            health,
            shutdown_rx,
        })
    }

    /// Address the endpoint is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve scrapes until shutdown is signalled.
    pub async fn run(mut self) -> LivelockResult<()> {
        loop {
            if *self.shutdown_rx.borrow_and_update() {
                break;
            }

            let (stream, _) = tokio::select! {
                result = self.listener.accept() => match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "metrics accept failed");
                        continue;
                    }
                },
                _ = self.shutdown_rx.changed() => break,
            };

            let io = TokioIo::new(stream);
            let metrics = self.metrics.clone();
            let health = self.health.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = metrics.clone();
                    let health = health.clone();
                    async move { handle_request(req, &metrics, &health) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(error = %e, "error serving metrics connection");
                }
            });
        }

        tracing::info!("metrics endpoint stopped");
        Ok(())
    }
}

fn handle_request(
    req: Request<Incoming>,
    metrics: &LockMetrics,
    health: &HealthProbe,
) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text(StatusCode::OK, PROMETHEUS_TEXT, metrics.export()),
        (&Method::GET, "/healthz") => {
            let status = health.check();
            let code = if status.healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            text(code, TEXT_PLAIN, status.message)
        }
        _ => text(StatusCode::NOT_FOUND, TEXT_PLAIN, "Not Found".to_string()),
    };
    Ok(response)
}

fn text(status: StatusCode, content_type: &'static str, body: String) -> Response<Body> {
    let mut response = Response::new(Body::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
