//! Configuration loading and live reload.
//!
//! # Responsibilities
//! - Read and validate the YAML file at startup and on SIGUSR2
//! - Split settings into a fixed part (read once) and a dynamic part
//!   (republished atomically on every reload)
//! - Notify subscribers (the maintenance loop) after a successful reload
//!
//! # Design Decisions
//! - Dynamic settings are an immutable snapshot behind an `ArcSwap`;
//!   request handlers pin one snapshot for the whole request
//! - The reload lock is distinct from the engine's admission lock
//! - A failed reload leaves the previous snapshot active

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::schema::RawConfig;
use crate::config::validation;
use crate::security::{IpList, IpListError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read configuration file `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unable to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    IpList(#[from] IpListError),

    #[error("unable to read template `{path}`: {source}")]
    Template {
        path: String,
        source: std::io::Error,
    },
}

/// A certificate/key file pair.
#[derive(Debug, Clone)]
pub struct TlsFiles {
    pub cert_file: String,
    pub key_file: String,
}

/// Settings read once at startup; a reload does not change them.
#[derive(Debug)]
pub struct FixedConfig {
    pub addr: String,
    pub api_addr: String,
    pub cookie_name: String,
    pub timeout: Duration,
    pub tls: Option<TlsFiles>,
    pub api_tls: Option<TlsFiles>,
}

/// Per-backend settings extracted from the configuration.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub url: String,
    pub session_ttl: Duration,
    pub max_sessions: usize,
    pub tls_insecure: bool,
    pub weight: f64,
}

/// Settings rebuilt and republished on every reload.
#[derive(Debug)]
pub struct DynamicConfig {
    pub session_refresh_interval: Duration,
    pub queue_session_ttl: Duration,
    /// 0 means unbounded.
    pub queue_max_sessions: usize,
    pub queue_template: String,
    pub full_queue_template: String,
    pub trusted_proxies: IpList,
    pub whitelisted_ips: IpList,
    pub api_username: String,
    pub api_password: String,
    pub backends: BTreeMap<String, BackendSettings>,
}

/// Handle to the live configuration, shared by every component.
#[derive(Debug)]
pub struct Config {
    path: PathBuf,
    fixed: FixedConfig,
    dynamic: ArcSwap<DynamicConfig>,
    reload_subscribers: Mutex<Vec<mpsc::Sender<()>>>,
}

impl Config {
    /// Load and validate the configuration file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let raw = read_raw(&path)?;
        validation::validate(&raw)?;
        let dynamic = DynamicConfig::from_raw(&raw)?;
        let fixed = FixedConfig::from_raw(&raw);

        Ok(Self {
            path,
            fixed,
            dynamic: ArcSwap::from_pointee(dynamic),
            reload_subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn fixed(&self) -> &FixedConfig {
        &self.fixed
    }

    /// Pin the current dynamic snapshot.
    pub fn dynamic(&self) -> Arc<DynamicConfig> {
        self.dynamic.load_full()
    }

    /// Register for reload notifications. One message is delivered per
    /// successful reload; an undrained pending message stands in for any
    /// number of them.
    pub fn subscribe_reload(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        self.reload_subscribers.lock().push(tx);

        rx
    }

    /// Re-read the file and republish the dynamic snapshot. On error the
    /// previous snapshot stays active and no notification is sent.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let subscribers = self.reload_subscribers.lock();

        let raw = read_raw(&self.path)?;
        validation::validate(&raw)?;
        let dynamic = DynamicConfig::from_raw(&raw)?;
        self.dynamic.store(Arc::new(dynamic));

        for subscriber in subscribers.iter() {
            let _ = subscriber.try_send(());
        }

        Ok(())
    }
}

fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(serde_yaml::from_str(&contents)?)
}

fn read_template(path: &str) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Template {
        path: path.to_string(),
        source,
    })
}

fn tls_files(cert_file: &str, key_file: &str) -> Option<TlsFiles> {
    if cert_file.is_empty() || key_file.is_empty() {
        return None;
    }

    Some(TlsFiles {
        cert_file: cert_file.to_string(),
        key_file: key_file.to_string(),
    })
}

impl FixedConfig {
    fn from_raw(raw: &RawConfig) -> Self {
        Self {
            addr: raw.addr.clone(),
            api_addr: raw.api.addr.clone(),
            cookie_name: raw.cookie_name.clone(),
            timeout: Duration::from_secs(raw.timeout),
            tls: tls_files(&raw.tls.cert_file, &raw.tls.key_file),
            api_tls: tls_files(&raw.api.tls.cert_file, &raw.api.tls.key_file),
        }
    }
}

impl DynamicConfig {
    fn from_raw(raw: &RawConfig) -> Result<Self, ConfigError> {
        let trusted_proxies = IpList::new(&raw.trusted_proxies)?;
        let whitelisted_ips = IpList::new(&raw.whitelisted_ips)?;
        let queue_template = read_template(&raw.queue.template)?;
        let full_queue_template = read_template(&raw.queue.full_template)?;

        let mut backends = BTreeMap::new();
        for (name, backend) in &raw.backends {
            backends.insert(
                name.clone(),
                BackendSettings {
                    url: backend.url.clone(),
                    session_ttl: Duration::from_secs(backend.session_ttl),
                    max_sessions: backend.max_sessions as usize,
                    tls_insecure: backend.tls.insecure,
                    weight: backend.weight.unwrap_or(1.0),
                },
            );
        }

        Ok(Self {
            session_refresh_interval: Duration::from_secs(raw.session_refresh_interval),
            queue_session_ttl: Duration::from_secs(raw.queue.session_ttl),
            queue_max_sessions: raw.queue.max_sessions as usize,
            queue_template,
            full_queue_template,
            trusted_proxies,
            whitelisted_ips,
            api_username: raw.api.username.clone(),
            api_password: raw.api.password.clone(),
            backends,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();

        path.to_string_lossy().into_owned()
    }

    fn config_yaml(dir: &tempfile::TempDir, backends: &str) -> String {
        let queue_template = write_file(dir, "queue.html", "<p>please wait</p>");
        let full_template = write_file(dir, "full.html", "<p>come back later</p>");

        format!(
            "addr: 127.0.0.1:6363\n\
             cookie_name: qpid\n\
             timeout: 5\n\
             session_refresh_interval: 1\n\
             api:\n  addr: 127.0.0.1:6364\n\
             queue:\n  session_ttl: 5\n  max_sessions: 1\n  template: {queue_template}\n  full_template: {full_template}\n\
             {backends}"
        )
    }

    #[test]
    fn load_builds_both_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = config_yaml(
            &dir,
            "backends:\n  app:\n    url: http://127.0.0.1:6464\n    session_ttl: 60\n    max_sessions: 2\n    weight: 0.5\n",
        );
        let path = write_file(&dir, "qproxy.yaml", &yaml);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.fixed().cookie_name, "qpid");
        assert_eq!(config.fixed().timeout, Duration::from_secs(5));
        assert!(config.fixed().tls.is_none());

        let dynamic = config.dynamic();
        assert_eq!(dynamic.queue_max_sessions, 1);
        assert_eq!(dynamic.queue_template, "<p>please wait</p>");
        let app = &dynamic.backends["app"];
        assert_eq!(app.max_sessions, 2);
        assert_eq!(app.weight, 0.5);
        assert_eq!(app.session_ttl, Duration::from_secs(60));
    }

    #[test]
    fn missing_template_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = "addr: a\ncookie_name: c\ntimeout: 1\nsession_refresh_interval: 1\n\
                    api:\n  addr: b\n\
                    queue:\n  session_ttl: 1\n  template: /nonexistent/queue.html\n  full_template: /nonexistent/full.html\n\
                    backends:\n  app:\n    url: http://x\n    session_ttl: 1\n    max_sessions: 1\n";
        let path = write_file(&dir, "qproxy.yaml", yaml);

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/queue.html"));
    }

    #[test]
    fn reload_republishes_dynamic_settings_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = config_yaml(
            &dir,
            "backends:\n  app:\n    url: http://127.0.0.1:6464\n    session_ttl: 60\n    max_sessions: 2\n",
        );
        let path = write_file(&dir, "qproxy.yaml", &yaml);
        let config = Config::load(&path).unwrap();
        let mut notifications = config.subscribe_reload();

        let updated = config_yaml(
            &dir,
            "backends:\n  app:\n    url: http://127.0.0.1:6464\n    session_ttl: 60\n    max_sessions: 7\n",
        );
        fs::write(&path, updated).unwrap();

        config.reload().unwrap();
        assert_eq!(config.dynamic().backends["app"].max_sessions, 7);
        assert!(notifications.try_recv().is_ok());
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = config_yaml(
            &dir,
            "backends:\n  app:\n    url: http://127.0.0.1:6464\n    session_ttl: 60\n    max_sessions: 2\n",
        );
        let path = write_file(&dir, "qproxy.yaml", &yaml);
        let config = Config::load(&path).unwrap();
        let mut notifications = config.subscribe_reload();

        fs::write(&path, "backends: {}\n").unwrap();

        assert!(config.reload().is_err());
        assert_eq!(config.dynamic().backends["app"].max_sessions, 2);
        assert!(notifications.try_recv().is_err());
    }
}
