//! Wait-for-categorization coordinator (spec.md §4.5, §9).
//!
//! Bridges the ingredient fan-out to the categorization stage without a
//! DAG engine: this is a bounded polling loop, invoked as an action inside
//! the note pipeline, not a scheduled job of its own. The original
//! implementation resolved its scheduler and status lookups through
//! dynamic module imports to avoid an init cycle between categorization
//! scheduling, completion tracking, and itself; this crate takes the same
//! three collaborators as constructor-injected trait objects instead
//! (spec.md §9 design note), the same seam shape the teacher uses for
//! `Database`/`Broker`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broker::{Broker, JobState};
use crate::completion_tracker::CompletionTracker;
use crate::database::Database;
use crate::error::PipelineError;

/// The queue wait-for-categorization polls for a terminal job record
/// (spec.md §4.5 step 2b).
pub const CATEGORIZATION_QUEUE: &str = "categorization";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaitForCategorizationConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub log_throttle_ms: u64,
}

impl Default for WaitForCategorizationConfig {
    fn default() -> Self {
        Self {
            max_retries: 30,
            retry_delay_ms: 1_000,
            log_throttle_ms: 5_000,
        }
    }
}

/// Schedules the categorization job once ingredient processing has
/// drained. Generalizes the original's dynamic "categorization scheduler"
/// module import. Implementations must be idempotent under the same job
/// key (spec.md §9 Open Question 3): a retry after a transient DB error
/// may call `schedule` again for a note that was already scheduled.
#[async_trait]
pub trait CategorizationScheduler: Send + Sync {
    async fn schedule_categorization_job(&self, note_id: &str, import_id: &str) -> Result<(), PipelineError>;
}

/// Reports whether ingredient processing has fully drained for a note.
/// [`CompletionTracker`] implements this directly.
#[async_trait]
pub trait IngredientStatusSource: Send + Sync {
    async fn ingredients_ready(&self, note_id: &str) -> bool;
}

#[async_trait]
impl IngredientStatusSource for CompletionTracker {
    async fn ingredients_ready(&self, note_id: &str) -> bool {
        self.ingredient_completion_status(note_id).await.is_complete
    }
}

/// Return contract consumed by the action that invokes the coordinator
/// (spec.md §4.5, §6: "Return contract").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WaitForCategorizationResult {
    pub success: bool,
    pub categorization_scheduled: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub has_categorization: bool,
    pub has_tags: bool,
    pub categories_count: usize,
    pub tags_count: usize,
}

impl WaitForCategorizationResult {
    fn no_note_id(max_retries: u32) -> Self {
        Self {
            success: false,
            categorization_scheduled: false,
            retry_count: 0,
            max_retries,
            has_categorization: false,
            has_tags: false,
            categories_count: 0,
            tags_count: 0,
        }
    }

    fn exhausted(categorization_scheduled: bool, max_retries: u32) -> Self {
        Self {
            success: false,
            categorization_scheduled,
            retry_count: max_retries,
            max_retries,
            has_categorization: false,
            has_tags: false,
            categories_count: 0,
            tags_count: 0,
        }
    }
}

/// Object-safe facade so a worker's `Dependencies` can hold one without
/// naming the scheduler's concrete type.
#[async_trait]
pub trait CategorizationWaiter: Send + Sync {
    async fn wait_and_schedule(
        &self,
        note_id: Option<&str>,
        import_id: &str,
    ) -> WaitForCategorizationResult;
}

pub struct WaitForCategorizationCoordinator<S: CategorizationScheduler> {
    scheduler: Arc<S>,
    ingredients: Arc<dyn IngredientStatusSource>,
    broker: Arc<dyn Broker>,
    database: Arc<dyn Database>,
    config: WaitForCategorizationConfig,
}

impl<S: CategorizationScheduler> WaitForCategorizationCoordinator<S> {
    pub fn new(
        scheduler: Arc<S>,
        ingredients: Arc<dyn IngredientStatusSource>,
        broker: Arc<dyn Broker>,
        database: Arc<dyn Database>,
        config: WaitForCategorizationConfig,
    ) -> Self {
        Self {
            scheduler,
            ingredients,
            broker,
            database,
            config,
        }
    }

    /// spec.md §4.5 algorithm. No external cancellation signal is honored
    /// directly; the loop exits at the next iteration boundary, matching
    /// spec.md §5's cancellation note.
    pub async fn wait_and_schedule(
        &self,
        note_id: Option<&str>,
        import_id: &str,
    ) -> WaitForCategorizationResult {
        let Some(note_id) = note_id else {
            return WaitForCategorizationResult::no_note_id(self.config.max_retries);
        };

        let mut scheduled = false;
        let mut last_wait_log: Option<Instant> = None;

        for retry_count in 0..self.config.max_retries {
            if !scheduled {
                if self.ingredients.ingredients_ready(note_id).await {
                    match self.scheduler.schedule_categorization_job(note_id, import_id).await {
                        Ok(()) => {
                            scheduled = true;
                            tracing::debug!(note_id, "categorization job scheduled");
                        }
                        Err(err) => {
                            tracing::warn!(note_id, error = %err, "failed to schedule categorization job, will retry");
                        }
                    }
                }
            } else {
                match self.broker.query(CATEGORIZATION_QUEUE, note_id).await {
                    Ok(jobs) => {
                        if let Some(outcome) = self.terminal_outcome(note_id, &jobs).await {
                            return outcome;
                        }
                    }
                    Err(err) => {
                        // Reset so the next iteration reattempts scheduling;
                        // relies on the scheduler being idempotent via the
                        // job key (spec.md §9 Open Question 3).
                        tracing::warn!(note_id, error = %err, "categorization job query failed, resetting");
                        scheduled = false;
                    }
                }
            }

            let should_log = last_wait_log
                .map(|t| t.elapsed() >= Duration::from_millis(self.config.log_throttle_ms))
                .unwrap_or(true);
            if should_log {
                tracing::debug!(note_id, retry_count, scheduled, "still waiting for categorization");
                last_wait_log = Some(Instant::now());
            }

            tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
        }

        tracing::warn!(note_id, max_retries = self.config.max_retries, "wait-for-categorization exhausted");
        WaitForCategorizationResult::exhausted(scheduled, self.config.max_retries)
    }

    async fn terminal_outcome(
        &self,
        note_id: &str,
        jobs: &[crate::broker::Job],
    ) -> Option<WaitForCategorizationResult> {
        let has_terminal = jobs.iter().any(|job| job.state.is_terminal_success());
        if !has_terminal {
            return None;
        }

        let categories_count = self.database.get_note_categories(note_id).await.unwrap_or_default();
        let tags_count = self.database.get_note_tags(note_id).await.unwrap_or_default();
        let has_categorization = categories_count > 0;
        let has_tags = tags_count > 0;

        if has_categorization || has_tags {
            Some(WaitForCategorizationResult {
                success: true,
                categorization_scheduled: true,
                retry_count: 0,
                max_retries: self.config.max_retries,
                has_categorization,
                has_tags,
                categories_count,
                tags_count,
            })
        } else {
            None
        }
    }
}

#[async_trait]
impl<S: CategorizationScheduler + Send + Sync> CategorizationWaiter for WaitForCategorizationCoordinator<S> {
    async fn wait_and_schedule(
        &self,
        note_id: Option<&str>,
        import_id: &str,
    ) -> WaitForCategorizationResult {
        WaitForCategorizationCoordinator::wait_and_schedule(self, note_id, import_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{EnqueueOptions, InMemoryBroker, Job, JobHandler};
    use crate::database::InMemoryDatabase;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Schedules by enqueuing onto the real in-memory broker, so the
    /// coordinator's subsequent `broker.query` polls see the job the same
    /// way it would in production.
    struct EnqueueingScheduler {
        broker: Arc<InMemoryBroker>,
        scheduled: Mutex<Vec<String>>,
        fail_first_n: AtomicU32,
    }

    impl EnqueueingScheduler {
        fn new(broker: Arc<InMemoryBroker>) -> Self {
            Self {
                broker,
                scheduled: Mutex::new(vec![]),
                fail_first_n: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CategorizationScheduler for EnqueueingScheduler {
        async fn schedule_categorization_job(&self, note_id: &str, _import_id: &str) -> Result<(), PipelineError> {
            if self.fail_first_n.load(Ordering::SeqCst) > 0 {
                self.fail_first_n.fetch_sub(1, Ordering::SeqCst);
                return Err(PipelineError::transient("schedule", anyhow::anyhow!("db hiccup")));
            }
            self.broker
                .enqueue(
                    CATEGORIZATION_QUEUE,
                    Some(note_id.to_string()),
                    serde_json::json!({}),
                    EnqueueOptions::default(),
                )
                .await
                .map_err(|err| PipelineError::transient("enqueue", anyhow::anyhow!(err.to_string())))?;
            self.scheduled.lock().unwrap().push(note_id.to_string());
            Ok(())
        }
    }

    struct ImmediatelyCompletes;

    #[async_trait]
    impl JobHandler for ImmediatelyCompletes {
        async fn handle(&self, _job: Job) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }

    fn fast_config() -> WaitForCategorizationConfig {
        WaitForCategorizationConfig {
            max_retries: 20,
            retry_delay_ms: 5,
            log_throttle_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn returns_immediately_with_no_note_id() {
        let broker = Arc::new(InMemoryBroker::new());
        let tracker = Arc::new(CompletionTracker::new(None));
        let coordinator = WaitForCategorizationCoordinator::new(
            Arc::new(EnqueueingScheduler::new(broker.clone())),
            tracker,
            broker,
            Arc::new(InMemoryDatabase::new()),
            fast_config(),
        );
        let result = coordinator.wait_and_schedule(None, "imp-1").await;
        assert!(!result.success);
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn schedules_then_succeeds_once_job_terminal_and_categorized() {
        let tracker = Arc::new(CompletionTracker::new(None));
        tracker.set_total_ingredient_lines("n1", 1).await;
        tracker.mark_ingredient_line_completed("n1", 0).await;

        let broker = Arc::new(InMemoryBroker::new());
        broker
            .subscribe(CATEGORIZATION_QUEUE, 1, Arc::new(ImmediatelyCompletes))
            .await
            .unwrap();

        let db = Arc::new(InMemoryDatabase::new());
        db.set_categories("n1", 2);

        let scheduler = Arc::new(EnqueueingScheduler::new(broker.clone()));
        let coordinator = WaitForCategorizationCoordinator::new(
            scheduler.clone(),
            tracker,
            broker,
            db,
            fast_config(),
        );

        let result = coordinator.wait_and_schedule(Some("n1"), "imp-1").await;

        assert!(result.success);
        assert!(result.categorization_scheduled);
        assert!(result.has_categorization);
        assert_eq!(result.categories_count, 2);
        assert!(scheduler.scheduled.lock().unwrap().contains(&"n1".to_string()));
    }

    #[tokio::test]
    async fn exhausts_after_max_retries_when_ingredients_never_ready() {
        let broker = Arc::new(InMemoryBroker::new());
        let tracker = Arc::new(CompletionTracker::new(None));
        tracker.set_total_ingredient_lines("n1", 3).await;

        let coordinator = WaitForCategorizationCoordinator::new(
            Arc::new(EnqueueingScheduler::new(broker.clone())),
            tracker,
            broker,
            Arc::new(InMemoryDatabase::new()),
            fast_config(),
        );

        let config = fast_config();
        let started = Instant::now();
        let result = coordinator.wait_and_schedule(Some("n1"), "imp-1").await;
        let elapsed = started.elapsed();

        assert!(!result.success);
        assert_eq!(result.retry_count, result.max_retries);
        assert!(elapsed <= Duration::from_millis(config.max_retries as u64 * config.retry_delay_ms + 1_000));
    }

    #[tokio::test]
    async fn scheduler_failure_is_retried_next_iteration() {
        let tracker = Arc::new(CompletionTracker::new(None));
        tracker.set_total_ingredient_lines("n1", 1).await;
        tracker.mark_ingredient_line_completed("n1", 0).await;

        let broker = Arc::new(InMemoryBroker::new());
        broker
            .subscribe(CATEGORIZATION_QUEUE, 1, Arc::new(ImmediatelyCompletes))
            .await
            .unwrap();

        let scheduler = Arc::new(EnqueueingScheduler::new(broker.clone()));
        scheduler.fail_first_n.store(2, Ordering::SeqCst);

        let db = Arc::new(InMemoryDatabase::new());
        db.set_tags("n1", 1);

        let coordinator = WaitForCategorizationCoordinator::new(scheduler.clone(), tracker, broker, db, fast_config());

        let result = coordinator.wait_and_schedule(Some("n1"), "imp-1").await;

        assert!(result.success);
        assert!(scheduler.scheduled.lock().unwrap().contains(&"n1".to_string()));
    }
}
