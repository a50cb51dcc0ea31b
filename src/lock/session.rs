//! Session tracking and the release-all grace timer.
//!
//! A session moves through `ACTIVE → GRACE → RECLAIMED`. Disconnecting puts
//! it in GRACE and arms a timer; if the timer fires while the session is
//! still in that same grace period, every lock it holds is released. A
//! client that reconnects and presents its session id with `HELLO` moves the
//! session back to ACTIVE and the pending timer is cancelled.
//!
//! Timers are tokio tasks. Each one carries the epoch of the grace period
//! that armed it, and the registry refuses to reclaim a session whose
//! current epoch differs, so a timer that loses a race with a resume is
//! harmless.

use super::registry::{LockRegistry, SessionId};
use crate::core::error::{LivelockError, LivelockResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Debug)]
struct GraceTimer {
    epoch: u64,
    handle: AbortHandle,
}

/// Maps connections to sessions and owns their grace timers.
#[derive(Debug)]
pub struct SessionTracker {
    registry: Arc<LockRegistry>,
    release_all_timeout: Duration,
    timers: Mutex<HashMap<SessionId, GraceTimer>>,
}

impl SessionTracker {
    /// Create a tracker releasing abandoned sessions after `release_all_timeout`.
    pub fn new(registry: Arc<LockRegistry>, release_all_timeout: Duration) -> Self {
        Self {
            registry,
            release_all_timeout,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// The registry this tracker reclaims into.
    pub fn registry(&self) -> &Arc<LockRegistry> {
        &self.registry
    }

    /// Grace period applied on disconnect.
    pub fn release_all_timeout(&self) -> Duration {
        self.release_all_timeout
    }

    /// Register a session for a newly accepted connection.
    pub fn open(&self) -> SessionId {
        let session = self.registry.register_session();
        tracing::debug!(%session, "session opened");
        session
    }

    /// Record activity from `session`, cancelling any pending reclaim.
    pub fn on_activity(&self, session: SessionId) {
        self.registry.touch(session);
        self.cancel(session);
    }

    /// Start the grace period for a session whose connection went away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_disconnect(self: &Arc<Self>, session: SessionId) {
        let Some(epoch) = self
            .registry
            .begin_grace(session, self.release_all_timeout)
        else {
            return;
        };

        tracing::info!(
            %session,
            timeout_ms = self.release_all_timeout.as_millis() as u64,
            "session entered grace period"
        );

        // Insert under the timers lock so the task cannot fire before its
        // entry exists.
        let mut timers = self.timers.lock();
        let tracker = Arc::clone(self);
        let timeout = self.release_all_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracker.fire(session, epoch);
        });
        if let Some(stale) = timers.insert(
            session,
            GraceTimer {
                epoch,
                handle: task.abort_handle(),
            },
        ) {
            stale.handle.abort();
        }
    }

    /// Resume the session named by `token` on the connection that currently
    /// owns `current`.
    pub fn resume(&self, current: SessionId, token: &[u8]) -> LivelockResult<SessionId> {
        let requested = SessionId::parse(token).ok_or_else(|| LivelockError::UnknownSession {
            session: String::from_utf8_lossy(token).into_owned(),
        })?;

        let session = self.registry.resume(current, requested)?;
        self.cancel(session);
        tracing::info!(%session, discarded = %current, "session resumed");
        Ok(session)
    }

    /// Number of armed grace timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Abort every pending timer. Sessions stay in the registry as they are.
    pub fn shutdown(&self) {
        let timers: Vec<GraceTimer> = self.timers.lock().drain().map(|(_, t)| t).collect();
        if !timers.is_empty() {
            tracing::debug!(count = timers.len(), "aborting grace timers");
        }
        for timer in timers {
            timer.handle.abort();
        }
    }

    fn cancel(&self, session: SessionId) -> bool {
        let timer = self.timers.lock().remove(&session);
        match timer {
            Some(timer) => {
                timer.handle.abort();
                tracing::debug!(%session, "grace timer cancelled");
                true
            }
            None => false,
        }
    }

    fn fire(&self, session: SessionId, epoch: u64) {
        {
            let mut timers = self.timers.lock();
            if timers.get(&session).is_some_and(|t| t.epoch == epoch) {
                timers.remove(&session);
            }
        }

        match self.registry.reclaim_if_grace(session, epoch) {
            Some(released) => {
                tracing::info!(%session, released, "session reclaimed after grace period");
            }
            None => {
                tracing::debug!(%session, epoch, "stale grace timer ignored");
            }
        }
    }
}
