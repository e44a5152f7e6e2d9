//! Configuration schema definitions.
//!
//! Raw shape of the YAML configuration file. All types derive Serde traits
//! and default to zero values so that validation, not deserialization,
//! reports missing options.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Root of the YAML configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// Proxy bind address (e.g. "0.0.0.0:8080").
    pub addr: String,

    /// Name of the session cookie.
    pub cookie_name: String,

    /// Per-request timeout, in seconds.
    pub timeout: u64,

    /// Maintenance tick period, in seconds.
    pub session_refresh_interval: u64,

    /// TLS material for the proxy listener.
    pub tls: RawTls,

    /// Admin API surface.
    pub api: RawApi,

    /// Waiting-room settings.
    pub queue: RawQueue,

    /// Hops whose X-Forwarded-For contributions are honored.
    pub trusted_proxies: Vec<String>,

    /// Sources forwarded without session accounting.
    pub whitelisted_ips: Vec<String>,

    /// Origin backends, keyed by name.
    pub backends: BTreeMap<String, RawBackend>,
}

/// A certificate/key file pair. TLS is enabled when both are set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTls {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawApi {
    /// Admin bind address.
    pub addr: String,

    pub tls: RawTls,

    /// Basic auth is required when both username and password are set.
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawQueue {
    /// TTL of queued sessions, in seconds.
    pub session_ttl: u64,

    /// Queue capacity; 0 means unbounded.
    pub max_sessions: i64,

    /// Path to the waiting-room HTML page.
    pub template: String,

    /// Path to the full-queue HTML page.
    pub full_template: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawBackend {
    /// Origin URL.
    pub url: String,

    /// TTL of sessions admitted to this backend, in seconds.
    pub session_ttl: u64,

    /// Maximum concurrent sessions.
    pub max_sessions: i64,

    pub tls: RawBackendTls,

    /// Placement bias in (0, 1]; defaults to 1.
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawBackendTls {
    /// Skip upstream certificate verification.
    pub insecure: bool,
}
