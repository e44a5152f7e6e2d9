//! Configuration: YAML schema, validation, loading, and live reload.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{BackendSettings, Config, ConfigError, DynamicConfig, FixedConfig, TlsFiles};
