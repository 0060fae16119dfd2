//! Configuration for the task engine.
//!
//! Everything is read from environment variables:
//! - `TASKFORGE_PROVIDER` - Optional. `openai` or `mock`. Defaults to `openai`
//!   when an API key is present, `mock` otherwise.
//! - `TASKFORGE_API_KEY` - API key for the OpenAI-compatible endpoint.
//!   `OPENAI_API_KEY` is honored as a fallback.
//! - `TASKFORGE_BASE_URL` - Optional. Endpoint override (no trailing slash).
//! - `TASKFORGE_MODEL` - Optional. Chat model override.
//! - `TASKFORGE_EMBEDDING_MODEL` - Optional. Embedding model override.
//! - `TASKFORGE_MEMORY_CAPACITY` - Optional. Experience cache size per agent.
//!   Defaults to `1000`.
//! - `TASKFORGE_PAUSE_POLL_MS` - Optional. How often a paused run re-checks
//!   its control state, in milliseconds. Defaults to `1000`.
//! - `TASKFORGE_STORE` - Optional. `memory` or `sqlite`. Defaults to `memory`.
//! - `TASKFORGE_SQLITE_PATH` - Optional. Database path for the SQLite store.
//!   Defaults to `taskforge.db`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::agent::DEFAULT_PAUSE_POLL;
use crate::memory::DEFAULT_CAPACITY;
use crate::store::StoreKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Which LLM provider backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP endpoint.
    OpenAi,
    /// Deterministic scripted client, no network.
    Mock,
}

impl ProviderKind {
    /// Parse from a configuration value. Unknown values are rejected rather
    /// than silently falling back: a typo here would silently skip the API.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// LLM provider selection
    pub provider: ProviderKind,

    /// API key for the OpenAI-compatible endpoint
    pub api_key: Option<String>,

    /// Endpoint override; the client default applies when unset
    pub base_url: Option<String>,

    /// Chat model override
    pub model: Option<String>,

    /// Embedding model override
    pub embedding_model: Option<String>,

    /// Experience cache capacity per agent
    pub memory_capacity: usize,

    /// Pause poll interval in milliseconds
    pub pause_poll_ms: u64,

    /// Persistence backend
    pub store: StoreKind,

    /// Database path for the SQLite store
    pub sqlite_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Mock,
            api_key: None,
            base_url: None,
            model: None,
            embedding_model: None,
            memory_capacity: DEFAULT_CAPACITY,
            pause_poll_ms: DEFAULT_PAUSE_POLL.as_millis() as u64,
            store: StoreKind::Memory,
            sqlite_path: PathBuf::from("taskforge.db"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` when `TASKFORGE_PROVIDER=openai`
    /// is set without an API key, and `ConfigError::InvalidValue` for
    /// unparseable numeric or enum values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = get("TASKFORGE_API_KEY").or_else(|| get("OPENAI_API_KEY"));

        let provider = match get("TASKFORGE_PROVIDER") {
            Some(raw) => ProviderKind::parse(&raw)
                .ok_or_else(|| ConfigError::InvalidValue("TASKFORGE_PROVIDER".to_string(), raw))?,
            None if api_key.is_some() => ProviderKind::OpenAi,
            None => ProviderKind::Mock,
        };

        if provider == ProviderKind::OpenAi && api_key.is_none() {
            return Err(ConfigError::MissingEnvVar("TASKFORGE_API_KEY".to_string()));
        }

        let memory_capacity = match get("TASKFORGE_MEMORY_CAPACITY") {
            Some(raw) => raw.parse().map_err(|e| {
                ConfigError::InvalidValue("TASKFORGE_MEMORY_CAPACITY".to_string(), format!("{}", e))
            })?,
            None => DEFAULT_CAPACITY,
        };
        if memory_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "TASKFORGE_MEMORY_CAPACITY".to_string(),
                "must be positive".to_string(),
            ));
        }

        let pause_poll_ms = match get("TASKFORGE_PAUSE_POLL_MS") {
            Some(raw) => raw.parse().map_err(|e| {
                ConfigError::InvalidValue("TASKFORGE_PAUSE_POLL_MS".to_string(), format!("{}", e))
            })?,
            None => DEFAULT_PAUSE_POLL.as_millis() as u64,
        };

        let store = get("TASKFORGE_STORE")
            .map(|raw| StoreKind::from_str(&raw))
            .unwrap_or_default();

        let sqlite_path = get("TASKFORGE_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("taskforge.db"));

        Ok(Self {
            provider,
            api_key,
            base_url: get("TASKFORGE_BASE_URL"),
            model: get("TASKFORGE_MODEL"),
            embedding_model: get("TASKFORGE_EMBEDDING_MODEL"),
            memory_capacity,
            pause_poll_ms,
            store,
            sqlite_path,
        })
    }

    /// Pause poll interval as a [`Duration`].
    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_to_mock_without_a_key() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.provider, ProviderKind::Mock);
        assert!(config.api_key.is_none());
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.memory_capacity, DEFAULT_CAPACITY);
        assert_eq!(config.pause_poll(), DEFAULT_PAUSE_POLL);
    }

    #[test]
    fn an_api_key_selects_openai() {
        let config = Config::from_lookup(lookup(&[("TASKFORGE_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn openai_api_key_is_honored_as_fallback() {
        let config = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-fallback")])).unwrap();
        assert_eq!(config.provider, ProviderKind::OpenAi);
        assert_eq!(config.api_key.as_deref(), Some("sk-fallback"));
    }

    #[test]
    fn explicit_openai_without_a_key_is_an_error() {
        let err = Config::from_lookup(lookup(&[("TASKFORGE_PROVIDER", "openai")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(v) if v == "TASKFORGE_API_KEY"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = Config::from_lookup(lookup(&[("TASKFORGE_PROVIDER", "oracle")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "TASKFORGE_PROVIDER"));
    }

    #[test]
    fn bad_capacity_values_are_rejected() {
        let err =
            Config::from_lookup(lookup(&[("TASKFORGE_MEMORY_CAPACITY", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "TASKFORGE_MEMORY_CAPACITY"));

        let err = Config::from_lookup(lookup(&[("TASKFORGE_MEMORY_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(v, _) if v == "TASKFORGE_MEMORY_CAPACITY"));
    }

    #[test]
    fn overrides_flow_through() {
        let config = Config::from_lookup(lookup(&[
            ("TASKFORGE_API_KEY", "sk-test"),
            ("TASKFORGE_BASE_URL", "http://localhost:8080/v1"),
            ("TASKFORGE_MODEL", "gpt-4o"),
            ("TASKFORGE_EMBEDDING_MODEL", "custom-embed"),
            ("TASKFORGE_MEMORY_CAPACITY", "25"),
            ("TASKFORGE_PAUSE_POLL_MS", "50"),
            ("TASKFORGE_STORE", "sqlite"),
            ("TASKFORGE_SQLITE_PATH", "/tmp/forge.db"),
        ]))
        .unwrap();

        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080/v1"));
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.embedding_model.as_deref(), Some("custom-embed"));
        assert_eq!(config.memory_capacity, 25);
        assert_eq!(config.pause_poll(), Duration::from_millis(50));
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.sqlite_path, PathBuf::from("/tmp/forge.db"));
    }
}
