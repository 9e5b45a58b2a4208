//! Action & pipeline executor (spec.md §4.2).
//!
//! An action is the smallest composable unit of pipeline work: stateless,
//! all state flows through `PipelineData` or shared `Dependencies`.
//! Middleware wrappers (see [`crate::middleware`]) are themselves actions
//! holding a single inner action, so the executor only ever deals with
//! `Box<dyn Action>`.

pub mod executor;
pub mod registry;

pub use executor::PipelineExecutor;
pub use registry::{ActionFactory, ActionId, ActionRegistry};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::broker::Broker;
use crate::completion_tracker::CompletionTracker;
use crate::database::Database;
use crate::error::PipelineError;
use crate::metrics::MetricsCollector;
use crate::pattern_tracker::PatternTracker;
use crate::status::StatusBroadcaster;
use crate::wait_for_categorization::CategorizationWaiter;

pub type ActionError = PipelineError;

/// Read-only context threaded through one job's execution (spec.md §3:
/// `ActionContext`). Actions must not mutate it.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub job_id: String,
    pub queue_name: String,
    pub operation: String,
    pub worker_name: String,
    pub start_time: DateTime<Utc>,
    pub attempt_number: u32,
    pub retry_count: u32,
}

impl ActionContext {
    pub fn new(job_id: impl Into<String>, queue_name: impl Into<String>, worker_name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            queue_name: queue_name.into(),
            operation: String::new(),
            worker_name: worker_name.into(),
            start_time: Utc::now(),
            attempt_number: 0,
            retry_count: 0,
        }
    }
}

/// Payload plus accumulated fields, passed by value through the action
/// chain (spec.md §3: `PipelineData<T>`). Actions may return the same
/// `T` unchanged — the executor never assumes a deep copy happened.
#[derive(Debug, Clone)]
pub struct PipelineData<T> {
    pub payload: T,
    pub note_id: Option<String>,
    pub import_id: Option<String>,
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl<T> PipelineData<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            note_id: None,
            import_id: None,
            fields: serde_json::Map::new(),
        }
    }

    pub fn with_note_id(mut self, note_id: impl Into<String>) -> Self {
        self.note_id = Some(note_id.into());
        self
    }

    pub fn with_import_id(mut self, import_id: impl Into<String>) -> Self {
        self.import_id = Some(import_id.into());
        self
    }

    pub fn set_field(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// Dependencies constructed once per worker, shared across every job that
/// worker processes (spec.md §3: `Dependencies`). `database` and
/// `status_broadcaster` are used by nearly every action; the remaining
/// slots are populated only by workers whose action chain needs them
/// (e.g. the note worker needs `completion_tracker` and `broker`, the
/// ingredient worker needs `pattern_tracker`).
#[derive(Clone)]
pub struct Dependencies {
    pub database: Arc<dyn Database>,
    pub status_broadcaster: Option<Arc<dyn StatusBroadcaster>>,
    pub broker: Option<Arc<dyn Broker>>,
    pub completion_tracker: Option<Arc<CompletionTracker>>,
    pub pattern_tracker: Option<Arc<PatternTracker>>,
    pub categorization_waiter: Option<Arc<dyn CategorizationWaiter>>,
    pub metrics: Option<Arc<MetricsCollector>>,
}

impl Dependencies {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            database,
            status_broadcaster: None,
            broker: None,
            completion_tracker: None,
            pattern_tracker: None,
            categorization_waiter: None,
            metrics: None,
        }
    }

    pub fn with_status_broadcaster(mut self, broadcaster: Arc<dyn StatusBroadcaster>) -> Self {
        self.status_broadcaster = Some(broadcaster);
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_completion_tracker(mut self, tracker: Arc<CompletionTracker>) -> Self {
        self.completion_tracker = Some(tracker);
        self
    }

    pub fn with_pattern_tracker(mut self, tracker: Arc<PatternTracker>) -> Self {
        self.pattern_tracker = Some(tracker);
        self
    }

    pub fn with_categorization_waiter(mut self, waiter: Arc<dyn CategorizationWaiter>) -> Self {
        self.categorization_waiter = Some(waiter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// A unit of pipeline work (spec.md §4.2).
///
/// `execute` may perform I/O and must be restart-safe: the broker gives
/// at-least-once delivery, so actions are expected to be idempotent where
/// that matters (spec.md §1 Non-goals).
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable identifier used in logs and wrapper composition.
    fn name(&self) -> String;

    /// Fast precondition check. Returning `Some` fails the job before any
    /// side effect runs.
    fn validate_input(&self, _data: &serde_json::Value) -> Option<ActionError> {
        None
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        deps: &Dependencies,
        context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError>;

    /// Hint for middleware: logging/observability actions are explicitly
    /// non-retryable.
    fn retryable(&self) -> bool {
        true
    }

    /// Optional hook invoked by `ErrorHandlingWrapper` before the error is
    /// rethrown.
    async fn on_error(&self, _error: &ActionError, _data: &serde_json::Value, _deps: &Dependencies) {}
}
