//! Core runtime infrastructure.
//!
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Component lifecycle
//! - [`time`] - Clock abstraction
//! - [`error`] - Error types and wire error mapping

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
