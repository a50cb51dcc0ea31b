//! Lock registry.
//!
//! The registry is the single authority over lock ownership. It keeps two
//! maps behind one mutex:
//!
//! - `locks`: lock name → [`Lock`] (holder, acquisition time, optional TTL)
//! - `sessions`: session id → [`Session`] (held lock names, liveness, grace state)
//!
//! Every operation takes the mutex once, does its map work and releases it
//! before touching metrics, so callers never hold two internal locks at a
//! time. TTL expiry is lazy: a lapsed lock is removed by whichever operation
//! next touches its name. [`LockRegistry::sweep_expired`] exists only to
//! reclaim memory held by names nobody touches again.

use crate::core::error::{LivelockError, LivelockResult};
use crate::core::time::{Clock, Timestamp};
use crate::ops::observability::LockMetrics;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Server-generated session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an id presented by a client.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .map(Self)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    /// Lock name.
    pub name: Bytes,
    /// Owning session.
    pub holder: SessionId,
    /// When the lock was acquired or last extended.
    pub acquired_at: Timestamp,
    /// Time to live from `acquired_at`; `None` holds until released.
    pub ttl: Option<Duration>,
}

impl Lock {
    /// Absolute expiry, if the lock has a TTL.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.ttl.map(|ttl| self.acquired_at.add(ttl))
    }

    /// Check if the lock has expired at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at()
            .is_some_and(|deadline| now.is_at_or_after(deadline))
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Attached to a live connection.
    Active,
    /// Disconnected; locks are kept until `deadline` unless the session resumes.
    Grace {
        /// When the session will be reclaimed.
        deadline: Timestamp,
        /// Identifies this grace period; a stale timer carries an older epoch.
        epoch: u64,
    },
}

/// A client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session identity.
    pub id: SessionId,
    /// Names of locks this session holds.
    pub held_locks: HashSet<Bytes>,
    /// Last command seen from the session.
    pub last_seen: Timestamp,
    /// Lifecycle state.
    pub state: SessionState,
}

impl Session {
    fn new(id: SessionId, now: Timestamp) -> Self {
        Self {
            id,
            held_locks: HashSet::new(),
            last_seen: now,
            state: SessionState::Active,
        }
    }

    /// Check if the session is waiting out a grace period.
    pub fn in_grace(&self) -> bool {
        matches!(self.state, SessionState::Grace { .. })
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    locks: HashMap<Bytes, Lock>,
    sessions: HashMap<SessionId, Session>,
    in_grace: usize,
    next_epoch: u64,
}

/// Registry sizes published to gauges after each mutation.
#[derive(Debug, Clone, Copy)]
struct Sizes {
    locks: usize,
    sessions: usize,
    in_grace: usize,
}

impl RegistryState {
    fn sizes(&self) -> Sizes {
        Sizes {
            locks: self.locks.len(),
            sessions: self.sessions.len(),
            in_grace: self.in_grace,
        }
    }

    /// Remove a lock record and unlink it from its holder.
    fn remove_lock(&mut self, name: &[u8]) -> Option<Lock> {
        let lock = self.locks.remove(name)?;
        if let Some(session) = self.sessions.get_mut(&lock.holder) {
            session.held_locks.remove(name);
        }
        Some(lock)
    }

    /// Drop `name` if its TTL has lapsed. Returns true if it was removed.
    fn purge_if_expired(&mut self, name: &[u8], now: Timestamp) -> bool {
        let expired = self
            .locks
            .get(name)
            .is_some_and(|lock| lock.is_expired_at(now));
        if expired {
            self.remove_lock(name);
        }
        expired
    }

    fn touch(&mut self, session: SessionId, now: Timestamp) -> LivelockResult<&mut Session> {
        let record = self
            .sessions
            .get_mut(&session)
            .ok_or_else(|| LivelockError::UnknownSession {
                session: session.to_string(),
            })?;
        record.last_seen = now;
        Ok(record)
    }

    /// Release every lock `session` still holds and forget the session.
    fn release_all(&mut self, session: SessionId) -> usize {
        let Some(record) = self.sessions.remove(&session) else {
            return 0;
        };
        if record.in_grace() {
            self.in_grace -= 1;
        }

        let mut released = 0;
        for name in &record.held_locks {
            if self
                .locks
                .get(name)
                .is_some_and(|lock| lock.holder == session)
            {
                self.locks.remove(name);
                released += 1;
            }
        }
        released
    }
}

/// In-memory lock registry shared by all connections.
pub struct LockRegistry {
    state: Mutex<RegistryState>,
    clock: Arc<dyn Clock>,
    metrics: Arc<LockMetrics>,
    max_name_len: usize,
}

impl LockRegistry {
    /// Create an empty registry.
    pub fn new(clock: Arc<dyn Clock>, metrics: Arc<LockMetrics>, max_name_len: usize) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            clock,
            metrics,
            max_name_len,
        }
    }

    /// Current time on the registry clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Register a new, empty, active session.
    pub fn register_session(&self) -> SessionId {
        let id = SessionId::generate();
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.sessions.insert(id, Session::new(id, now));
        self.publish(&state);
        id
    }

    /// Acquire `name` for `session`.
    ///
    /// Fails with [`LivelockError::AlreadyHeld`] while another session holds
    /// an unexpired lock on the name. Acquiring a lock the session already
    /// holds refreshes its acquisition time and TTL.
    pub fn try_acquire(
        &self,
        session: SessionId,
        name: Bytes,
        ttl: Option<Duration>,
    ) -> LivelockResult<Lock> {
        self.check_name(&name)?;
        let now = self.clock.now();

        let (result, expired) = {
            let mut state = self.state.lock();
            let expired = state.purge_if_expired(&name, now);

            let contested = state
                .locks
                .get(&name)
                .is_some_and(|existing| existing.holder != session);

            let result = if contested {
                Err(LivelockError::already_held(&name))
            } else {
                state.touch(session, now).map(|record| {
                    record.held_locks.insert(name.clone());
                    Lock {
                        name: name.clone(),
                        holder: session,
                        acquired_at: now,
                        ttl,
                    }
                })
            };
            if let Ok(ref lock) = result {
                state.locks.insert(name.clone(), lock.clone());
            }
            self.publish(&state);
            (result, expired)
        };

        self.metrics.record_expirations(u64::from(expired));
        match &result {
            Ok(_) => self.metrics.record_acquire(),
            Err(LivelockError::AlreadyHeld { .. }) => self.metrics.record_contested_acquire(),
            Err(_) => {}
        }
        result
    }

    /// Release `name` if `session` holds it.
    ///
    /// A name longer than the configured limit can never be held, so it is
    /// reported as not held.
    pub fn release(&self, session: SessionId, name: &[u8]) -> LivelockResult<()> {
        if name.len() > self.max_name_len {
            return Err(LivelockError::not_holder(name));
        }
        let now = self.clock.now();

        let (result, expired) = {
            let mut state = self.state.lock();
            let expired = state.purge_if_expired(name, now);
            let _ = state.touch(session, now);

            let held = state
                .locks
                .get(name)
                .is_some_and(|lock| lock.holder == session);
            let result = if held {
                state.remove_lock(name);
                Ok(())
            } else {
                Err(LivelockError::not_holder(name))
            };
            self.publish(&state);
            (result, expired)
        };

        self.metrics.record_expirations(u64::from(expired));
        if result.is_ok() {
            self.metrics.record_release();
        }
        result
    }

    /// Restart the TTL of `name` from now if `session` holds it.
    pub fn extend(&self, session: SessionId, name: &[u8], ttl: Duration) -> LivelockResult<Lock> {
        if name.len() > self.max_name_len {
            return Err(LivelockError::not_holder(name));
        }
        let now = self.clock.now();

        let (result, expired) = {
            let mut state = self.state.lock();
            let expired = state.purge_if_expired(name, now);
            let _ = state.touch(session, now);

            let result = match state.locks.get_mut(name) {
                Some(lock) if lock.holder == session => {
                    lock.acquired_at = now;
                    lock.ttl = Some(ttl);
                    Ok(lock.clone())
                }
                _ => Err(LivelockError::not_holder(name)),
            };
            self.publish(&state);
            (result, expired)
        };

        self.metrics.record_expirations(u64::from(expired));
        if result.is_ok() {
            self.metrics.record_extend();
        }
        result
    }

    /// Release every lock `session` holds and forget the session.
    ///
    /// Only locks the session still holds are released; a name that expired
    /// and was re-acquired by someone else is left alone. Calling this for an
    /// unknown or already released session does nothing and returns 0.
    pub fn release_all(&self, session: SessionId) -> usize {
        let mut state = self.state.lock();
        let released = state.release_all(session);
        self.publish(&state);
        released
    }

    /// Record activity for `session`. Returns false for unknown sessions.
    pub fn touch(&self, session: SessionId) -> bool {
        let now = self.clock.now();
        self.state.lock().touch(session, now).is_ok()
    }

    /// Move an active session into its grace period.
    ///
    /// Returns the epoch identifying this grace period, or `None` if the
    /// session is unknown or already in grace.
    pub fn begin_grace(&self, session: SessionId, timeout: Duration) -> Option<u64> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let epoch = state.next_epoch + 1;

        let record = state.sessions.get_mut(&session)?;
        if record.in_grace() {
            return None;
        }
        record.state = SessionState::Grace {
            deadline: now.add(timeout),
            epoch,
        };
        state.next_epoch = epoch;
        state.in_grace += 1;
        self.publish(&state);
        Some(epoch)
    }

    /// Reclaim `session` if it is still in the grace period `epoch` started.
    ///
    /// Returns the number of locks released, or `None` when the session
    /// resumed, was already reclaimed, or entered a newer grace period.
    pub fn reclaim_if_grace(&self, session: SessionId, epoch: u64) -> Option<usize> {
        let released = {
            let mut state = self.state.lock();
            let current = state.sessions.get(&session)?;
            match current.state {
                SessionState::Grace { epoch: e, .. } if e == epoch => {}
                _ => return None,
            }
            let released = state.release_all(session);
            self.publish(&state);
            released
        };
        self.metrics.record_reclaim(released as u64);
        Some(released)
    }

    /// Reattach `requested` (in grace) to the connection currently using
    /// `current`.
    ///
    /// `current` must hold no locks; it is discarded on success.
    pub fn resume(&self, current: SessionId, requested: SessionId) -> LivelockResult<SessionId> {
        let now = self.clock.now();
        let unknown = || LivelockError::UnknownSession {
            session: requested.to_string(),
        };

        {
            let mut state = self.state.lock();
            if !state.sessions.get(&requested).is_some_and(Session::in_grace) {
                return Err(unknown());
            }
            if state
                .sessions
                .get(&current)
                .is_some_and(|s| !s.held_locks.is_empty())
            {
                return Err(LivelockError::invalid_request(
                    "cannot resume a session while holding locks",
                ));
            }

            state.sessions.remove(&current);
            let record = state.sessions.get_mut(&requested).ok_or_else(unknown)?;
            record.state = SessionState::Active;
            record.last_seen = now;
            state.in_grace -= 1;
            self.publish(&state);
        }

        self.metrics.record_resume();
        Ok(requested)
    }

    /// Current holder of `name`, ignoring expired locks.
    pub fn holder(&self, name: &[u8]) -> Option<SessionId> {
        self.lock(name).map(|lock| lock.holder)
    }

    /// Snapshot of the unexpired lock on `name`.
    pub fn lock(&self, name: &[u8]) -> Option<Lock> {
        let now = self.clock.now();
        self.state
            .lock()
            .locks
            .get(name)
            .filter(|lock| !lock.is_expired_at(now))
            .cloned()
    }

    /// Snapshot of a session record.
    pub fn session(&self, session: SessionId) -> Option<Session> {
        self.state.lock().sessions.get(&session).cloned()
    }

    /// Number of lock records, including expired ones not yet purged.
    pub fn lock_count(&self) -> usize {
        self.state.lock().locks.len()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Purge every expired lock. Returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = {
            let mut state = self.state.lock();
            let expired: Vec<Bytes> = state
                .locks
                .values()
                .filter(|lock| lock.is_expired_at(now))
                .map(|lock| lock.name.clone())
                .collect();
            for name in &expired {
                state.remove_lock(name);
            }
            self.publish(&state);
            expired.len()
        };
        self.metrics.record_expirations(removed as u64);
        removed
    }

    fn check_name(&self, name: &[u8]) -> LivelockResult<()> {
        if name.len() > self.max_name_len {
            return Err(LivelockError::LockNameTooLong {
                len: name.len(),
                max: self.max_name_len,
            });
        }
        Ok(())
    }

    /// Store the size gauges. Called with the state mutex held so that
    /// concurrent mutations publish in the order they applied.
    fn publish(&self, state: &RegistryState) {
        let sizes = state.sizes();
        self.metrics
            .set_registry_sizes(sizes.locks, sizes.sessions, sizes.in_grace);
    }
}

impl std::fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("max_name_len", &self.max_name_len)
            .finish_non_exhaustive()
    }
}
