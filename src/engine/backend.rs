//! Origin backends and the swappable set that holds them.
//!
//! # Responsibilities
//! - Represent one origin: URL, weight, capacity, session TTL
//! - Own the backend's session store and enforce its capacity
//! - Carry the preconfigured upstream HTTP client
//! - Rebuild the set on reload, adopting stores of surviving backends
//!
//! # Design Decisions
//! - The store is shared behind an `Arc` so a failed reload never strands
//!   sessions: old and rebuilt backends of the same name see one store
//! - Per-backend clients so `tls.insecure` and pool sizing stay local

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::BackendSettings;
use crate::engine::human_duration;
use crate::engine::session::{Session, SessionStore};

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const UPSTREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("[backend: {name}] invalid `url` option `{url}`: {source}")]
    Url {
        name: String,
        url: String,
        source: url::ParseError,
    },

    #[error("[backend: {name}] unable to build upstream client: {source}")]
    Client {
        name: String,
        source: reqwest::Error,
    },
}

/// Point-in-time accounting for one backend, as exposed on the admin API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BackendStatistics {
    pub name: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub sessions: usize,
    pub max_sessions: usize,
    #[serde(rename = "SessionTTL")]
    pub session_ttl: String,
}

/// One configured origin with a capacity cap and a placement weight.
#[derive(Debug)]
pub struct Backend {
    name: String,
    url: Url,
    weight: f64,
    session_ttl: Duration,
    max_sessions: usize,
    client: reqwest::Client,
    store: Arc<Mutex<SessionStore>>,
}

impl Backend {
    fn new(
        name: &str,
        settings: &BackendSettings,
        store: Option<Arc<Mutex<SessionStore>>>,
    ) -> Result<Self, BackendError> {
        let url = Url::parse(&settings.url).map_err(|source| BackendError::Url {
            name: name.to_string(),
            url: settings.url.clone(),
            source,
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .pool_max_idle_per_host(settings.max_sessions)
            .pool_idle_timeout(UPSTREAM_IDLE_TIMEOUT)
            .danger_accept_invalid_certs(settings.tls_insecure)
            .build()
            .map_err(|source| BackendError::Client {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            name: name.to_string(),
            url,
            weight: settings.weight,
            session_ttl: settings.session_ttl,
            max_sessions: settings.max_sessions,
            client,
            store: store.unwrap_or_default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Upstream HTTP client used to forward requests to this origin.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn load_session(&self, id: &str) -> Option<Arc<Session>> {
        self.store.lock().load(id)
    }

    /// Place a session with this id. An already-present id is returned as
    /// is, without a TTL refresh (refreshing is the lookup path's job).
    /// Returns `None` when the backend is at capacity.
    pub fn store_session(&self, id: &str) -> Option<Arc<Session>> {
        let mut store = self.store.lock();
        if let Some(existing) = store.load(id) {
            return Some(existing);
        }

        if self.max_sessions.saturating_sub(store.len()) == 0 {
            return None;
        }

        Some(store.store(Arc::new(Session::new(id.to_string(), self.session_ttl))))
    }

    pub fn remaining_places(&self) -> usize {
        self.max_sessions.saturating_sub(self.store.lock().len())
    }

    pub fn sweep_expired(&self) {
        self.store.lock().remove_expired();
    }

    pub fn session_count(&self) -> usize {
        self.store.lock().len()
    }

    pub fn statistics(&self) -> BackendStatistics {
        BackendStatistics {
            name: self.name.clone(),
            url: self.url.to_string(),
            sessions: self.session_count(),
            max_sessions: self.max_sessions,
            session_ttl: human_duration(self.session_ttl),
        }
    }
}

/// Build the backend set for the given settings. Backends that already
/// exist in `previous` (matched by name) keep their session store, so a
/// reload never drops sessions of surviving backends; removed backends'
/// stores go away with them.
pub fn build_backends(
    settings: &BTreeMap<String, BackendSettings>,
    previous: &[Arc<Backend>],
) -> Result<Vec<Arc<Backend>>, BackendError> {
    let mut backends = Vec::with_capacity(settings.len());
    for (name, backend_settings) in settings {
        let store = previous
            .iter()
            .find(|backend| backend.name() == name)
            .map(|backend| backend.store.clone());
        backends.push(Arc::new(Backend::new(name, backend_settings, store)?));
    }

    Ok(backends)
}
