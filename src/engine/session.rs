//! Sessions and the ordered in-memory store that holds them.
//!
//! # Responsibilities
//! - Represent one admitted or queued user identity
//! - Sliding expiration, refreshed on every successful lookup
//! - FIFO-ordered storage with idempotent insert and expiry sweep
//!
//! # Design Decisions
//! - Expiry is an atomic timestamp so read-locked lookups can refresh it
//! - Lookup is a linear scan; store sizes are bounded by small caps
//! - Stores are not synchronized themselves; the engine owns the lock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Generate a fresh session id: a time-ordered UUID, collision-resistant
/// and sortable by generation instant.
pub fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Check whether a client-presented id could have been produced by
/// [`new_session_id`]: it must parse and round-trip to the same text.
pub fn is_valid_session_id(id: &str) -> bool {
    if id.is_empty() {
        return false;
    }

    match Uuid::try_parse(id) {
        Ok(parsed) => parsed.to_string() == id,
        Err(_) => false,
    }
}

/// An admitted or queued user identity with a sliding expiration.
#[derive(Debug)]
pub struct Session {
    id: String,
    expires_at_millis: AtomicU64,
}

impl Session {
    pub fn new(id: String, ttl: Duration) -> Self {
        let session = Self {
            id,
            expires_at_millis: AtomicU64::new(0),
        };
        session.refresh(ttl);

        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Push the expiration out to `now + ttl`.
    pub fn refresh(&self, ttl: Duration) {
        self.expires_at_millis
            .store(now_millis() + ttl.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn expires_at_millis(&self) -> u64 {
        self.expires_at_millis.load(Ordering::Relaxed)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Ordered collection of sessions. Append preserves arrival order, so the
/// front of the store is always the oldest survivor.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Vec<Arc<Session>>,
}

impl SessionStore {
    pub fn load(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .iter()
            .find(|session| session.id() == id)
            .cloned()
    }

    /// Insert by id, idempotently: a session whose id is already present
    /// is returned unchanged instead of being appended twice.
    pub fn store(&mut self, session: Arc<Session>) -> Arc<Session> {
        if let Some(existing) = self.load(session.id()) {
            return existing;
        }

        self.sessions.push(session.clone());

        session
    }

    /// Remove and return the oldest `count` sessions, in order.
    pub fn pop(&mut self, count: usize) -> Vec<Arc<Session>> {
        let count = count.min(self.sessions.len());

        self.sessions.drain(..count).collect()
    }

    /// Put a session back at the head. No-op when the id is already present.
    pub fn unshift(&mut self, session: Arc<Session>) -> bool {
        if self.load(session.id()).is_some() {
            return false;
        }

        self.sessions.insert(0, session);

        true
    }

    /// Drop every session whose expiry is not strictly in the future,
    /// preserving the relative order of survivors.
    pub fn remove_expired(&mut self) {
        let now = now_millis();
        self.sessions
            .retain(|session| session.expires_at_millis() > now);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
