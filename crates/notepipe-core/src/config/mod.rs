//! Runtime configuration (SPEC_FULL.md §4, ambient stack addition).
//!
//! Layering follows the teacher's `foia::config::Settings`: typed structs
//! with sensible `Default`s, optionally overridden by a TOML file, then by
//! `NOTEPIPE_*` environment variables loaded through `dotenvy` before
//! anything else runs. `BrokerConfig::url` being `None` is the "use the
//! in-memory broker" case, matching `Settings::broker_url`'s documented
//! `None` = local DB / `Some("amqp://...")` = RabbitMQ convention.

use serde::{Deserialize, Serialize};

use crate::broker::Backoff;
use crate::middleware::{CircuitBreakerConfig, RetryConfig};
use crate::wait_for_categorization::WaitForCategorizationConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// `None` uses the in-memory broker. `Some("amqp://...")` or
    /// `Some("redis://...")` selects a durable backend, gated behind the
    /// `amqp-broker` / `redis-backend` Cargo features.
    pub url: Option<String>,
    pub default_backoff: Backoff,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_backoff: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternTrackerConfig {
    pub max_upsert_attempts: u32,
}

impl Default for PatternTrackerConfig {
    fn default() -> Self {
        Self {
            max_upsert_attempts: 3,
        }
    }
}

/// Root settings object. Construct with [`Settings::load`] to pick up a
/// TOML file and environment overrides, or [`Settings::default`] for
/// tests and standalone runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub wait_for_categorization: WaitForCategorizationConfig,
    pub pattern_tracker: PatternTrackerConfig,
    pub metrics_retention: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to parse environment override '{key}': {message}")]
    Env { key: String, message: String },
}

impl Settings {
    /// Loads `.env` (if present), then a TOML file at `path` (if given),
    /// then applies `NOTEPIPE_*` environment overrides on top.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut settings = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };

        settings.apply_env_overrides()?;
        Ok(settings)
    }

    fn from_toml_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("NOTEPIPE_BROKER_URL") {
            self.broker.url = Some(url);
        }
        if let Ok(value) = std::env::var("NOTEPIPE_WORKER_CONCURRENCY") {
            self.worker.concurrency = parse_env("NOTEPIPE_WORKER_CONCURRENCY", &value)?;
        }
        if let Ok(value) = std::env::var("NOTEPIPE_WORKER_MAX_ATTEMPTS") {
            self.worker.max_attempts = parse_env("NOTEPIPE_WORKER_MAX_ATTEMPTS", &value)?;
        }
        if let Ok(value) = std::env::var("NOTEPIPE_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("NOTEPIPE_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Ok(value) = std::env::var("NOTEPIPE_CIRCUIT_BREAKER_THRESHOLD") {
            self.circuit_breaker.failure_threshold = parse_env("NOTEPIPE_CIRCUIT_BREAKER_THRESHOLD", &value)?;
        }
        if let Ok(value) = std::env::var("NOTEPIPE_METRICS_RETENTION") {
            self.metrics_retention = parse_env("NOTEPIPE_METRICS_RETENTION", &value)?;
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        message: format!("could not parse '{value}'"),
    })
}
