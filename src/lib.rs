//! Livelock - named locks that are held for as long as the client is alive.
//!
//! Clients speak a small RESP-style protocol over TCP. A lock is owned by the
//! session of the connection that acquired it, optionally bounded by a TTL.
//! When a connection goes away its session enters a grace period; unless the
//! client comes back and resumes the session with `HELLO <id>`, every lock it
//! holds is released when the grace period ends. TCP keepalive probes turn a
//! silently dead peer into a disconnect.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │            clients (ACQUIRE / RELEASE / EXTEND ...)        │
//! └────────────────────────────────────────────────────────────┘
//!                              │ RESP over TCP
//! ┌────────────────────────────────────────────────────────────┐
//! │  net: listener, keepalive, one task per connection          │
//! └────────────────────────────────────────────────────────────┘
//!                              │ Command
//! ┌────────────────────────────────────────────────────────────┐
//! │  lock: LockRegistry (locks, sessions)  SessionTracker       │
//! │        lazy TTL expiry                 grace timers         │
//! └────────────────────────────────────────────────────────────┘
//!                              │
//! ┌────────────────────────────────────────────────────────────┐
//! │  ops: counters and gauges, /metrics and /healthz            │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! - [`core::config`] - Configuration parsing, overrides and validation
//! - [`core::runtime`] - Component lifecycle
//! - [`core::time`] - Clock abstraction
//! - [`core::error`] - Error types and wire error mapping
//! - [`protocol`] - RESP frames, decoder/encoder and commands
//! - [`lock::registry`] - Lock and session state
//! - [`lock::session`] - Grace timers and session resumption
//! - [`net`] - TCP listener, connection handler and server loop
//! - [`ops`] - Metrics and health endpoint
//! - [`cli`] - Command-line interface
//!
//! # Key Invariants
//!
//! - At most one session holds a given lock name at any instant.
//! - An expired lock is never reported as held, whether or not it has been
//!   swept yet.
//! - A session's locks are released only after its grace period elapses
//!   without a resume.

pub mod cli;
pub mod core;
pub mod lock;
pub mod net;
pub mod ops;
pub mod protocol;

pub use self::core::{config, error, runtime, time};
pub use lock::{LockRegistry, SessionId, SessionTracker};
pub use ops::observability;
