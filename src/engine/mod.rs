//! Admission and session-placement engine.
//!
//! # Data Flow
//! ```text
//! request → sticky lookup (read lock)
//!         → admit: weighted direct placement or enqueue (write lock)
//! tick    → sweep expired, promote queued sessions (write lock)
//! SIGUSR2 → reload config, rebuild backend set (write lock)
//! ```
//!
//! # Design Decisions
//! - One admission lock orders every mutation of the queue and of the
//!   backend stores; lookups share it in read mode
//! - The backend set is an immutable snapshot behind an `ArcSwap` so pure
//!   reads (statistics iteration, whitelist pick) never block a reload
//! - Session expiry is atomic, letting read-locked lookups refresh TTLs

pub mod backend;
pub mod maintenance;
pub mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::config::Config;
use crate::engine::backend::{build_backends, Backend, BackendError, BackendStatistics};
use crate::engine::session::{new_session_id, Session, SessionStore};

/// Point-in-time view of the whole proxy, as exposed on the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProxyStatistics {
    pub uptime: String,
    pub queued_sessions: usize,
    pub max_queued_sessions: usize,
    #[serde(rename = "QueuedSessionTTL")]
    pub queued_session_ttl: String,
    pub backends: Vec<BackendStatistics>,
}

/// Where a session ended up: on a backend, or parked in the queue.
pub type Placement = (Arc<Session>, Option<Arc<Backend>>);

/// The placement engine. Owns the waiting queue, the published backend
/// set, and the admission lock that orders every mutation of either.
pub struct AdmissionEngine {
    config: Arc<Config>,
    started_at: Instant,
    backends: ArcSwap<Vec<Arc<Backend>>>,
    // Admission lock. Read for lookups and statistics, write for admit,
    // promotion, and reload. Must be held before touching the queue or
    // any backend store.
    admission: RwLock<()>,
    queue: Mutex<SessionStore>,
}

impl AdmissionEngine {
    pub fn new(config: Arc<Config>) -> Result<Self, BackendError> {
        let backends = build_backends(&config.dynamic().backends, &[])?;

        Ok(Self {
            config,
            started_at: Instant::now(),
            backends: ArcSwap::from_pointee(backends),
            admission: RwLock::new(()),
            queue: Mutex::new(SessionStore::default()),
        })
    }

    /// Sticky lookup: find `id` on any backend or in the queue, refresh
    /// its TTL, and report where it lives.
    pub fn load_session(&self, id: &str) -> Option<Placement> {
        let _admission = self.admission.read();

        for backend in self.backends.load_full().iter() {
            if let Some(session) = backend.load_session(id) {
                session.refresh(backend.session_ttl());
                return Some((session, Some(backend.clone())));
            }
        }

        if let Some(session) = self.queue.lock().load(id) {
            session.refresh(self.config.dynamic().queue_session_ttl);
            return Some((session, None));
        }

        None
    }

    /// Create and place a brand-new session. Placement prefers a backend
    /// when the queue is empty, falls back to the queue, and returns
    /// `None` only when the queue is full.
    pub fn new_session(&self) -> Option<Placement> {
        let _admission = self.admission.write();
        let dynamic = self.config.dynamic();

        let id = new_session_id();

        if self.queue.lock().is_empty() {
            let mut available = self.available_backends();
            if !available.is_empty() {
                let mut rng = rand::thread_rng();
                available.shuffle(&mut rng);
                let draw: f64 = rng.gen();
                let last = available.len() - 1;
                for (index, backend) in available.iter().enumerate() {
                    // Low weights are skipped probabilistically, but the
                    // last candidate always gets a chance: admission must
                    // not fail while capacity exists somewhere.
                    if backend.weight() >= draw || index == last {
                        if let Some(session) = backend.store_session(&id) {
                            return Some((session, Some(backend.clone())));
                        }
                    }
                }
            }
        }

        if !self.queue_has_room(dynamic.queue_max_sessions) {
            return None;
        }

        let session = self
            .queue
            .lock()
            .store(Arc::new(Session::new(id, dynamic.queue_session_ttl)));

        Some((session, None))
    }

    /// True when the queue can still accept a session.
    pub fn has_remaining_queue_slots(&self) -> bool {
        let _admission = self.admission.read();

        self.queue_has_room(self.config.dynamic().queue_max_sessions)
    }

    fn queue_has_room(&self, max_queued: usize) -> bool {
        if max_queued == 0 {
            return true;
        }

        self.queue.lock().len() < max_queued
    }

    /// Maintenance step: sweep expired sessions everywhere, then move
    /// queued sessions onto backends with free places.
    pub fn promote_queued(&self) {
        let _admission = self.admission.write();

        let mut free_slots = 0;
        let mut available = Vec::new();
        self.queue.lock().remove_expired();
        for backend in self.backends.load_full().iter() {
            backend.sweep_expired();
            let remaining = backend.remaining_places();
            if remaining > 0 {
                free_slots += remaining;
                available.push(backend.clone());
            }
        }

        if free_slots == 0 || self.queue.lock().is_empty() {
            return;
        }

        let popped = self.queue.lock().pop(free_slots);
        let mut rng = rand::thread_rng();
        for session in popped {
            // Reshuffle per session so promotions spread across backends.
            available.shuffle(&mut rng);
            let draw: f64 = rng.gen();

            let mut stored = false;
            for backend in &available {
                if backend.remaining_places() == 0 {
                    continue;
                }
                if draw > backend.weight() {
                    continue;
                }
                if backend.store_session(session.id()).is_some() {
                    stored = true;
                    break;
                }
            }
            if stored {
                continue;
            }

            // Weight filter left the session unplaced; take the first
            // backend that still has room.
            for backend in &available {
                if backend.remaining_places() == 0 {
                    continue;
                }
                if backend.store_session(session.id()).is_some() {
                    stored = true;
                    break;
                }
            }
            if stored {
                continue;
            }

            // Capacity ran out mid-pass; park it back at the head.
            self.queue.lock().unshift(session);
        }
    }

    pub fn statistics(&self) -> ProxyStatistics {
        let _admission = self.admission.read();
        let dynamic = self.config.dynamic();

        ProxyStatistics {
            uptime: human_duration(self.started_at.elapsed()),
            queued_sessions: self.queue.lock().len(),
            max_queued_sessions: dynamic.queue_max_sessions,
            queued_session_ttl: human_duration(dynamic.queue_session_ttl),
            backends: self
                .backends
                .load_full()
                .iter()
                .map(|backend| backend.statistics())
                .collect(),
        }
    }

    /// Re-read the configuration and republish the backend set. Surviving
    /// backends keep their sessions; errors log and leave the previous
    /// state active.
    pub fn reload(&self) {
        let _admission = self.admission.write();

        if let Err(error) = self.config.reload() {
            tracing::error!(%error, "unable to reload configuration");
            return;
        }

        let previous = self.backends.load_full();
        match build_backends(&self.config.dynamic().backends, &previous) {
            Ok(rebuilt) => {
                self.backends.store(Arc::new(rebuilt));
                tracing::info!("configuration reloaded");
            }
            Err(error) => tracing::error!(%error, "unable to reload configuration"),
        }
    }

    /// Uniform pick over the full set, capacity ignored. Used for
    /// whitelisted traffic, which is never session-accounted.
    pub fn random_backend(&self) -> Arc<Backend> {
        let backends = self.backends.load_full();
        let index = rand::thread_rng().gen_range(0..backends.len());

        backends[index].clone()
    }

    fn available_backends(&self) -> Vec<Arc<Backend>> {
        self.backends
            .load_full()
            .iter()
            .filter(|backend| backend.remaining_places() > 0)
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn backend_named(&self, name: &str) -> Option<Arc<Backend>> {
        self.backends
            .load_full()
            .iter()
            .find(|backend| backend.name() == name)
            .cloned()
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }
}

pub(crate) fn human_duration(duration: Duration) -> String {
    humantime::format_duration(Duration::from_secs(duration.as_secs())).to_string()
}
