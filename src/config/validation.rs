//! Semantic validation of a parsed configuration.

use crate::config::loader::ConfigError;
use crate::config::schema::{RawBackend, RawConfig};

/// Validate a [`RawConfig`]. Runs at startup and again on every reload;
/// the first violation found is returned.
pub fn validate(raw: &RawConfig) -> Result<(), ConfigError> {
    let required_strings = [
        ("addr", &raw.addr),
        ("cookie_name", &raw.cookie_name),
        ("queue.template", &raw.queue.template),
        ("queue.full_template", &raw.queue.full_template),
        ("api.addr", &raw.api.addr),
    ];
    for (key, value) in required_strings {
        if value.is_empty() {
            return Err(ConfigError::Invalid(format!("Missing `{key}` option")));
        }
    }

    let required_durations = [
        ("session_refresh_interval", raw.session_refresh_interval),
        ("queue.session_ttl", raw.queue.session_ttl),
        ("timeout", raw.timeout),
    ];
    for (key, value) in required_durations {
        if value == 0 {
            return Err(ConfigError::Invalid(format!(
                "Option `{key}` must be greater than 0"
            )));
        }
    }

    if raw.queue.max_sessions < 0 {
        return Err(ConfigError::Invalid(
            "Option `queue.max_sessions` must be greater or equals than 0".to_string(),
        ));
    }

    if raw.backends.is_empty() {
        return Err(ConfigError::Invalid("No backends available".to_string()));
    }

    for (name, backend) in &raw.backends {
        validate_backend(backend)
            .map_err(|reason| ConfigError::Invalid(format!("[backend: {name}] {reason}")))?;
    }

    Ok(())
}

fn validate_backend(raw: &RawBackend) -> Result<(), String> {
    if raw.url.is_empty() {
        return Err("Missing `url` option".to_string());
    }

    if raw.session_ttl == 0 {
        return Err("Option `session_ttl` must be greater than 0".to_string());
    }

    if raw.max_sessions < 1 {
        return Err("Option `max_sessions` must be greater than 0".to_string());
    }

    let weight = raw.weight.unwrap_or(1.0);
    if weight <= 0.0 {
        return Err("Option `weight` must be greater than 0".to_string());
    }
    if weight > 1.0 {
        return Err("Option `weight` must be less or equals than 1".to_string());
    }

    Ok(())
}
