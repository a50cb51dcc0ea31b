//! Networking layer.
//!
//! - [`tcp`] - listener, socket options and connection ids
//! - [`connection`] - per-connection read/dispatch/write loop
//! - [`server`] - accept loop and shutdown drain

pub mod connection;
pub mod server;
pub mod tcp;

pub use connection::{CloseReason, ConnectionHandler};
pub use server::{LockServer, ServerOptions};
pub use tcp::{ConnectionId, TcpListener, TcpListenerConfig};
