//! Durable, at-least-once job broker (spec.md §4.1).
//!
//! One queue per stage type (note, ingredient, instruction, image,
//! categorization, source, pattern-tracking). FIFO within a queue at equal
//! priority; no ordering guarantee across queues. Generalizes the
//! teacher's claim/complete/fail `WorkQueue` trait
//! (`foia::work_queue::WorkQueue`) from "poll a DB for ready rows" to
//! "push/subscribe with broker-managed retry."

pub mod memory;

pub use memory::InMemoryBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("queue '{0}' has no subscriber")]
    NoSubscriber(String),
    #[error("job {0} not found")]
    NotFound(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Observable job states (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    /// Terminal in the sense wait-for-categorization polls for (§4.5):
    /// the job will not transition further without external intervention.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, JobState::Completed)
    }
}

/// Backoff strategy applied between retry attempts at enqueue time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Backoff {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Options supplied at enqueue time (spec.md §4.1, §6).
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: i32,
    pub attempts: u32,
    pub backoff: Backoff,
}

/// A durable job record (spec.md §3: `Job`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub note_id: Option<String>,
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// The broker exclusively mutates `attempt`/`state` (spec.md §3
    /// Ownership).
    pub(crate) fn new(
        id: String,
        queue: &str,
        note_id: Option<String>,
        payload: serde_json::Value,
        max_attempts: u32,
        backoff: Backoff,
    ) -> Self {
        Self {
            id,
            queue: queue.to_string(),
            note_id,
            payload,
            attempt: 0,
            max_attempts,
            backoff,
            state: JobState::Waiting,
            created_at: Utc::now(),
        }
    }
}

/// A handler invoked once per delivered job. Returning `Ok` marks the job
/// completed; returning `Err` marks it failed and, if attempts remain,
/// re-enqueues it with backoff (spec.md §4.1).
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<(), anyhow::Error>;
}

/// Durable FIFO queue broker (spec.md §4.1).
#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(
        &self,
        queue: &str,
        note_id: Option<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, BrokerError>;

    /// Binds a handler to a queue. Returns once the subscription is
    /// registered; delivery happens on the broker's own task.
    async fn subscribe(
        &self,
        queue: &str,
        concurrency: usize,
        handler: std::sync::Arc<dyn JobHandler>,
    ) -> Result<(), BrokerError>;

    /// Observe jobs for `note_id` on `queue` (used by wait-for-categorization
    /// to detect a terminal state, spec.md §4.5).
    async fn query(&self, queue: &str, note_id: &str) -> Result<Vec<Job>, BrokerError>;
}
