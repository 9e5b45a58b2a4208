//! Per-key circuit breaker (spec.md §4.3).
//!
//! Keyed state lives in an `Arc<RwLock<HashMap<String, Breaker>>>`,
//! grounded on the teacher's `InMemoryRateLimitBackend`
//! (`rate_limit::memory`): a domain entry per key, consulted and updated
//! under a single lock acquisition. The key is normally the action name
//! plus queue, so unrelated actions never trip each other's breaker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::action::{Action, ActionContext, ActionError, Dependencies};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
        }
    }
}

struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl Default for BreakerEntry {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Wraps an inner action with a per-key failure counter. Exceeding
/// `failure_threshold` consecutive failures opens the circuit; calls made
/// while open are rejected without invoking the inner action until
/// `reset_timeout_ms` elapses, at which point the breaker goes half-open
/// and lets a single probe call through.
pub struct CircuitBreaker {
    inner: Arc<dyn Action>,
    key: String,
    config: CircuitBreakerConfig,
    entries: Arc<RwLock<HashMap<String, BreakerEntry>>>,
}

impl CircuitBreaker {
    pub fn new(inner: Arc<dyn Action>, key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            key: key.into(),
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.entries
            .read()
            .await
            .get(&self.key)
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }

    async fn should_allow(&self) -> bool {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(self.key.clone()).or_default();
        match entry.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|t| (Utc::now() - t).num_milliseconds())
                    .unwrap_or(0);
                if elapsed >= self.config.reset_timeout_ms as i64 {
                    entry.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(self.key.clone()).or_default();
        entry.state = CircuitState::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
    }

    async fn record_failure(&self) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(self.key.clone()).or_default();
        entry.consecutive_failures += 1;
        if entry.state == CircuitState::HalfOpen || entry.consecutive_failures >= self.config.failure_threshold {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(Utc::now());
        }
    }
}

#[async_trait]
impl Action for CircuitBreaker {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn validate_input(&self, data: &serde_json::Value) -> Option<ActionError> {
        self.inner.validate_input(data)
    }

    fn retryable(&self) -> bool {
        self.inner.retryable()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        deps: &Dependencies,
        context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        if !self.should_allow().await {
            return Err(ActionError::CircuitOpen(self.key.clone()));
        }

        match self.inner.execute(data, deps, context).await {
            Ok(output) => {
                self.record_success().await;
                Ok(output)
            }
            Err(error) => {
                self.record_failure().await;
                Err(error)
            }
        }
    }

    async fn on_error(&self, error: &ActionError, data: &serde_json::Value, deps: &Dependencies) {
        self.inner.on_error(error, data, deps).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryDatabase;
    use std::time::Duration;

    struct AlwaysFails;

    #[async_trait]
    impl Action for AlwaysFails {
        fn name(&self) -> String {
            "always_fails".into()
        }

        async fn execute(
            &self,
            _data: serde_json::Value,
            _deps: &Dependencies,
            _context: &ActionContext,
        ) -> Result<serde_json::Value, ActionError> {
            Err(ActionError::transient("always_fails", anyhow::anyhow!("down")))
        }
    }

    fn deps() -> Dependencies {
        Dependencies::new(Arc::new(InMemoryDatabase::new()))
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(
            Arc::new(AlwaysFails),
            "downstream",
            CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 60_000,
            },
        );
        let ctx = ActionContext::new("job-1", "note", "worker-1");

        assert!(breaker.execute(serde_json::json!({}), &deps(), &ctx).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Closed);

        assert!(breaker.execute(serde_json::json!({}), &deps(), &ctx).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);

        let err = breaker.execute(serde_json::json!({}), &deps(), &ctx).await.unwrap_err();
        assert!(matches!(err, ActionError::CircuitOpen(_)));
    }

    /// spec.md §8 S5: after `reset_timeout_ms` elapses, a half-open probe
    /// that succeeds restores CLOSED and zeroes the failure count.
    #[tokio::test]
    async fn half_open_probe_success_restores_closed() {
        struct Switchable(std::sync::atomic::AtomicBool);
        #[async_trait]
        impl Action for Switchable {
            fn name(&self) -> String {
                "switchable".into()
            }
            async fn execute(
                &self,
                data: serde_json::Value,
                _deps: &Dependencies,
                _context: &ActionContext,
            ) -> Result<serde_json::Value, ActionError> {
                if self.0.load(std::sync::atomic::Ordering::SeqCst) {
                    Ok(data)
                } else {
                    Err(ActionError::transient("switchable", anyhow::anyhow!("down")))
                }
            }
        }

        let inner = Arc::new(Switchable(std::sync::atomic::AtomicBool::new(false)));
        let breaker = CircuitBreaker::new(
            inner.clone(),
            "flaky_upstream",
            CircuitBreakerConfig {
                failure_threshold: 2,
                reset_timeout_ms: 50,
            },
        );
        let ctx = ActionContext::new("job-1", "note", "worker-1");

        assert!(breaker.execute(serde_json::json!({}), &deps(), &ctx).await.is_err());
        assert!(breaker.execute(serde_json::json!({}), &deps(), &ctx).await.is_err());
        assert_eq!(breaker.state().await, CircuitState::Open);

        let rejected = breaker.execute(serde_json::json!({}), &deps(), &ctx).await.unwrap_err();
        assert!(matches!(rejected, ActionError::CircuitOpen(_)));

        tokio::time::sleep(Duration::from_millis(60)).await;
        inner.0.store(true, std::sync::atomic::Ordering::SeqCst);

        let result = breaker.execute(serde_json::json!({}), &deps(), &ctx).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }
}
