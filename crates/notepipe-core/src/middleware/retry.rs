//! In-process retry wrapper (spec.md §4.3).
//!
//! Distinct from broker-level retry (`broker::memory::backoff_delay`,
//! which re-delivers a failed *job*): this retries a single action's
//! `execute` call in place, inside one job attempt, for failures that are
//! cheap to retry immediately. The first attempt is attempt zero (spec.md
//! §3 invariant 6); a wrapper configured with `max_attempts = N` calls the
//! inner action at most `N + 1` times and sleeps before every attempt
//! after the first.
//!
//! `ValidationError`s are not retried (spec.md §7: "Fails fast; not
//! retried") since the precondition they report will not change between
//! attempts. Every other error kind is retried, matching the reference
//! behavior of an action that "always throws" (spec.md §8 S4).

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::action::{Action, ActionContext, ActionError, Dependencies};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// `min(maxDelay, baseDelay * backoffMultiplier^attempt)` plus up to
    /// 10% jitter when enabled (spec.md §4.3).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay_ms as f64);
        let delay_ms = if self.jitter {
            let jitter_fraction = rand::thread_rng().gen_range(0.0..0.1);
            capped * (1.0 + jitter_fraction)
        } else {
            capped
        };
        Duration::from_millis(delay_ms.round() as u64)
    }
}

fn is_retryable_error(error: &ActionError) -> bool {
    !matches!(error, ActionError::Validation { .. })
}

pub struct RetryWrapper {
    inner: Arc<dyn Action>,
    config: RetryConfig,
}

impl RetryWrapper {
    pub fn new(inner: Arc<dyn Action>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Action for RetryWrapper {
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
        if !self.inner.retryable() {
            return self.inner.execute(data, deps, context).await;
        }

        let mut attempt = 0u32;
        loop {
            match self.inner.execute(data.clone(), deps, context).await {
                Ok(output) => return Ok(output),
                Err(error) if attempt < self.config.max_attempts && is_retryable_error(&error) => {
                    let delay = self.config.delay_for_attempt(attempt);
                    tracing::debug!(
                        action = %self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying action after error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct FlakyThenOk {
        calls: Arc<AtomicUsize>,
        fail_until: usize,
    }

    #[async_trait]
    impl Action for FlakyThenOk {
        fn name(&self) -> String {
            "flaky".into()
        }

        async fn execute(
            &self,
            data: serde_json::Value,
            _deps: &Dependencies,
            _context: &ActionContext,
        ) -> Result<serde_json::Value, ActionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_until {
                return Err(ActionError::transient("flaky", anyhow::anyhow!("not yet")));
            }
            Ok(data)
        }
    }

    struct AlwaysThrows {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Action for AlwaysThrows {
        fn name(&self) -> String {
            "always_throws".into()
        }

        async fn execute(
            &self,
            _data: serde_json::Value,
            _deps: &Dependencies,
            _context: &ActionContext,
        ) -> Result<serde_json::Value, ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ActionError::Unexpected(anyhow::anyhow!("boom")))
        }
    }

    fn deps() -> Dependencies {
        Dependencies::new(Arc::new(InMemoryDatabase::new()))
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(FlakyThenOk {
            calls: calls.clone(),
            fail_until: 2,
        });
        let wrapper = RetryWrapper::new(
            inner,
            RetryConfig {
                max_attempts: 5,
                base_delay_ms: 1,
                max_delay_ms: 1000,
                backoff_multiplier: 1.0,
                jitter: false,
            },
        );
        let ctx = ActionContext::new("job-1", "note", "worker-1");
        let result = wrapper.execute(serde_json::json!(1), &deps(), &ctx).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(FlakyThenOk {
            calls: calls.clone(),
            fail_until: 100,
        });
        let wrapper = RetryWrapper::new(
            inner,
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 1000,
                backoff_multiplier: 1.0,
                jitter: false,
            },
        );
        let ctx = ActionContext::new("job-1", "note", "worker-1");
        let result = wrapper.execute(serde_json::json!(1), &deps(), &ctx).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    /// spec.md §8 S4: maxAttempts=3 wrapping an action that always throws
    /// expects 4 total calls and a total sleep of at least 10+20+40ms at
    /// those base/multiplier values.
    #[tokio::test]
    async fn s4_always_throwing_action_is_called_max_attempts_plus_one_times() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Arc::new(AlwaysThrows { calls: calls.clone() });
        let wrapper = RetryWrapper::new(
            inner,
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 10,
                max_delay_ms: 1000,
                backoff_multiplier: 2.0,
                jitter: false,
            },
        );
        let ctx = ActionContext::new("job-1", "note", "worker-1");
        let started = Instant::now();
        let result = wrapper.execute(serde_json::json!(1), &deps(), &ctx).await;
        let elapsed = started.elapsed();

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(elapsed >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn validation_errors_are_not_retried() {
        struct AlwaysInvalid;
        #[async_trait]
        impl Action for AlwaysInvalid {
            fn name(&self) -> String {
                "invalid".into()
            }
            async fn execute(
                &self,
                _data: serde_json::Value,
                _deps: &Dependencies,
                _context: &ActionContext,
            ) -> Result<serde_json::Value, ActionError> {
                Err(ActionError::validation("invalid", "bad"))
            }
        }
        let wrapper = RetryWrapper::new(Arc::new(AlwaysInvalid), RetryConfig::default());
        let ctx = ActionContext::new("job-1", "note", "worker-1");
        let result = wrapper.execute(serde_json::json!({}), &deps(), &ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn max_delay_caps_exponential_growth() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 1000,
            max_delay_ms: 3000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(3000));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(3000));
    }
}
