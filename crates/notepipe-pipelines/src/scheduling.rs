//! Concrete wait-for-categorization wiring (spec.md §4.5).
//!
//! `notepipe-core::wait_for_categorization` only defines the seams; a
//! deployment has to decide what "scheduling a categorization job" means
//! against its own broker. `build_categorization_waiter` wires the broker,
//! completion tracker, and database a worker's `Dependencies` already
//! carries into a working `CategorizationWaiter`.

use std::sync::Arc;

use async_trait::async_trait;

use notepipe_core::broker::{Broker, EnqueueOptions};
use notepipe_core::completion_tracker::CompletionTracker;
use notepipe_core::database::Database;
use notepipe_core::error::PipelineError;
use notepipe_core::wait_for_categorization::{
    CategorizationScheduler, CategorizationWaiter, WaitForCategorizationConfig, WaitForCategorizationCoordinator,
};

use crate::flow::QUEUE_CATEGORIZATION;

/// Schedules a categorization job by enqueuing it onto the broker, tagged
/// with the originating `importId` so downstream status events can
/// correlate back to the import that triggered it.
pub struct BrokerCategorizationScheduler {
    broker: Arc<dyn Broker>,
}

impl BrokerCategorizationScheduler {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl CategorizationScheduler for BrokerCategorizationScheduler {
    async fn schedule_categorization_job(&self, note_id: &str, import_id: &str) -> Result<(), PipelineError> {
        self.broker
            .enqueue(
                QUEUE_CATEGORIZATION,
                Some(note_id.to_string()),
                serde_json::json!({ "noteId": note_id, "importId": import_id }),
                EnqueueOptions::default(),
            )
            .await
            .map_err(|e| PipelineError::transient("schedule_categorization", e))?;
        Ok(())
    }
}

/// Assembles the default `CategorizationWaiter` from broker,
/// completion-tracker, and database state already available to a worker's
/// `Dependencies`.
pub fn build_categorization_waiter(
    broker: Arc<dyn Broker>,
    completion_tracker: Arc<CompletionTracker>,
    database: Arc<dyn Database>,
    config: WaitForCategorizationConfig,
) -> Arc<dyn CategorizationWaiter> {
    let scheduler = Arc::new(BrokerCategorizationScheduler::new(broker.clone()));
    Arc::new(WaitForCategorizationCoordinator::new(
        scheduler,
        completion_tracker,
        broker,
        database,
        config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notepipe_core::broker::{InMemoryBroker, Job, JobHandler};
    use notepipe_core::database::InMemoryDatabase;

    struct ImmediatelyCompletes;

    #[async_trait]
    impl JobHandler for ImmediatelyCompletes {
        async fn handle(&self, _job: Job) -> Result<(), anyhow::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn schedules_once_ingredient_lines_drain_and_reports_categorized() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        broker
            .subscribe(QUEUE_CATEGORIZATION, 1, Arc::new(ImmediatelyCompletes))
            .await
            .unwrap();

        let tracker = Arc::new(CompletionTracker::new(None));
        tracker.set_total_ingredient_lines("n1", 1).await;
        tracker.mark_ingredient_line_completed("n1", 0).await;

        let mem_db = InMemoryDatabase::new();
        mem_db.set_categories("n1", 1);
        let db: Arc<dyn Database> = Arc::new(mem_db);

        let waiter = build_categorization_waiter(
            broker.clone(),
            tracker,
            db,
            WaitForCategorizationConfig {
                max_retries: 20,
                retry_delay_ms: 5,
                log_throttle_ms: 5_000,
            },
        );

        let result = waiter.wait_and_schedule(Some("n1"), "imp-1").await;
        assert!(result.success);
        assert_eq!(broker.query(QUEUE_CATEGORIZATION, "n1").await.unwrap().len(), 1);
    }
}
