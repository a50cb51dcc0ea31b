//! Lock state.
//!
//! [`registry`] owns every lock and session record; [`session`] decides when
//! a disconnected session's locks are given back.

pub mod registry;
pub mod session;

pub use registry::{Lock, LockRegistry, Session, SessionId, SessionState};
pub use session::SessionTracker;
