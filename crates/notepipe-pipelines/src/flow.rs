//! Fan-out coordination actions: `wait_for_categorization`,
//! `schedule_categorization`, `track_completion`, `no_op` (spec.md §6).

use async_trait::async_trait;
use serde_json::json;

use notepipe_core::action::{Action, ActionContext, ActionError, Dependencies};
use notepipe_core::broker::EnqueueOptions;
use notepipe_core::completion_tracker::WorkerKind;

pub const QUEUE_CATEGORIZATION: &str = "categorization";

fn require_note_id(data: &serde_json::Value, action: &str) -> Result<String, ActionError> {
    data.get("noteId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ActionError::validation(action, "missing 'noteId' field"))
}

/// Polls until ingredient processing is ready, then schedules (or
/// confirms already scheduled) the categorization job. Exhaustion is a
/// soft failure recorded in `data["categorizationReady"]`, not an error
/// (spec.md §7: wait-for-categorization exhaustion continues the
/// pipeline).
pub struct WaitForCategorizationAction;

#[async_trait]
impl Action for WaitForCategorizationAction {
    fn name(&self) -> String {
        "wait_for_categorization".into()
    }

    fn retryable(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let note_id = require_note_id(&data, "wait_for_categorization")?;
        let import_id = data.get("importId").and_then(|v| v.as_str()).unwrap_or_default();
        let waiter = deps
            .categorization_waiter
            .as_ref()
            .ok_or_else(|| ActionError::validation("wait_for_categorization", "categorization waiter not configured"))?;

        // Exhaustion is a soft failure recorded in the data, not an error
        // (spec.md §7): the pipeline continues either way.
        let result = waiter.wait_and_schedule(Some(&note_id), import_id).await;
        let mut data = data;
        data["categorizationReady"] = json!(result.success);
        data["categorizationScheduled"] = json!(result.categorization_scheduled);
        data["categorizationRetryCount"] = json!(result.retry_count);
        Ok(data)
    }
}

/// Enqueues the categorization job directly. Used by workers that don't
/// go through the polling coordinator (e.g. re-triggering categorization
/// manually).
pub struct ScheduleCategorizationAction;

#[async_trait]
impl Action for ScheduleCategorizationAction {
    fn name(&self) -> String {
        "schedule_categorization".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let note_id = require_note_id(&data, "schedule_categorization")?;
        let broker = deps
            .broker
            .as_ref()
            .ok_or_else(|| ActionError::validation("schedule_categorization", "broker not configured"))?;

        broker
            .enqueue(
                QUEUE_CATEGORIZATION,
                Some(note_id.clone()),
                json!({ "noteId": note_id }),
                EnqueueOptions::default(),
            )
            .await
            .map_err(|e| ActionError::transient("schedule_categorization", e))?;

        Ok(data)
    }
}

/// Marks one of the four per-note worker completions done. `kind` is
/// fixed per worker at construction time — each queue's chain ends with
/// exactly one `TrackCompletionAction`.
pub struct TrackCompletionAction {
    kind: WorkerKind,
}

impl TrackCompletionAction {
    pub fn new(kind: WorkerKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Action for TrackCompletionAction {
    fn name(&self) -> String {
        "track_completion".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let note_id = require_note_id(&data, "track_completion")?;
        let tracker = deps
            .completion_tracker
            .as_ref()
            .ok_or_else(|| ActionError::validation("track_completion", "completion tracker not configured"))?;

        tracker.mark_worker_done(&note_id, self.kind).await;
        Ok(data)
    }
}

/// Passes data through unchanged. Used as a chain placeholder and in
/// tests.
pub struct NoOpAction;

#[async_trait]
impl Action for NoOpAction {
    fn name(&self) -> String {
        "no_op".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        _deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notepipe_core::database::InMemoryDatabase;
    use notepipe_core::completion_tracker::CompletionTracker;
    use std::sync::Arc;

    #[tokio::test]
    async fn track_completion_requires_tracker_dependency() {
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new()));
        let ctx = ActionContext::new("job-1", "note", "worker");
        let action = TrackCompletionAction::new(WorkerKind::Note);
        let result = action.execute(json!({ "noteId": "n1" }), &deps, &ctx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn track_completion_marks_worker_kind() {
        let tracker = Arc::new(CompletionTracker::new(None));
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new())).with_completion_tracker(tracker.clone());
        let ctx = ActionContext::new("job-1", "note", "worker");
        let action = TrackCompletionAction::new(WorkerKind::Note);
        action.execute(json!({ "noteId": "n1" }), &deps, &ctx).await.unwrap();
        assert!(tracker.snapshot("n1").await.note_done);
    }

    #[tokio::test]
    async fn no_op_passes_data_through() {
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new()));
        let ctx = ActionContext::new("job-1", "note", "worker");
        let input = json!({ "noteId": "n1" });
        let result = NoOpAction.execute(input.clone(), &deps, &ctx).await.unwrap();
        assert_eq!(result, input);
    }
}
