//! Configuration loading helpers.
//!
//! Every config struct in the workspace derives `Deserialize` with
//! `#[serde(default)]`, so partial JSON documents fill in documented defaults.
//! Secrets are never read from files: use the `Env*` auth descriptors, which
//! resolve through [`env_var`].

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Tuning for the source access manager itself (per-source settings live on
/// [`SourceSettings`](crate::SourceSettings)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub health_check_interval_ms: u64,
    pub cache_sweep_interval_ms: u64,
    pub pool_poll_interval_ms: u64,
    pub event_capacity: usize,
}

impl AccessConfig {
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub const fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    pub const fn pool_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pool_poll_interval_ms)
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            cache_sweep_interval_ms: 60_000,
            pool_poll_interval_ms: 10,
            event_capacity: 256,
        }
    }
}

pub fn from_json_str<T: DeserializeOwned>(input: &str) -> Result<T, ConfigError> {
    Ok(serde_json::from_str(input)?)
}

pub fn load_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
        path: path.display().to_string(),
        error,
    })?;
    from_json_str(&contents)
}

/// Reads a non-empty, trimmed environment variable.
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Like [`env_var`] but reports a missing variable as an error.
pub fn require_env(name: &str) -> Result<String, ConfigError> {
    env_var(name).ok_or_else(|| ConfigError::MissingEnv(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn partial_documents_fill_defaults() {
        let config: AccessConfig =
            from_json_str(r#"{"health_check_interval_ms": 500}"#).expect("valid config");
        assert_eq!(config.health_check_interval(), Duration::from_millis(500));
        assert_eq!(config.pool_poll_interval_ms, 10);
    }

    #[test]
    fn loads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"event_capacity": 8}}"#).expect("write config");

        let config: AccessConfig = load_json_file(file.path()).expect("file should load");
        assert_eq!(config.event_capacity, 8);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_json_file::<AccessConfig>("/definitely/not/here.json")
            .expect_err("must fail");
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }

    #[test]
    fn missing_env_is_reported() {
        let err = require_env("TRUSTGATE_TEST_UNSET_VARIABLE").expect_err("must be unset");
        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "TRUSTGATE_TEST_UNSET_VARIABLE"));
    }
}
