//! Error-stamping wrapper (spec.md §4.3).
//!
//! Runs the inner action; on failure, stamps the error with
//! `{jobId, operation: "<op> (<innerName>)", noteId?}` (`PipelineError::
//! stamp`), invokes the inner action's `on_error` hook, then rethrows.
//! This wrapper only stamps — it does not broadcast a FAILED status event.
//! That is the worker's job (spec.md §7: "Worker emits a FAILED status
//! event via broadcaster"); broadcasting here too would double-emit one
//! FAILED event per failure once this wrapper sits under
//! `WorkerHandler::handle` in the standard composition order.

use async_trait::async_trait;
use std::sync::Arc;

use crate::action::{Action, ActionContext, ActionError, Dependencies};

pub struct ErrorHandlingWrapper {
    inner: Arc<dyn Action>,
}

impl ErrorHandlingWrapper {
    pub fn new(inner: Arc<dyn Action>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Action for ErrorHandlingWrapper {
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
        match self.inner.execute(data.clone(), deps, context).await {
            Ok(output) => Ok(output),
            Err(error) => {
                self.inner.on_error(&error, &data, deps).await;
                let note_id = data.get("noteId").and_then(|v| v.as_str());
                let operation = format!("{} ({})", context.queue_name, self.inner.name());
                Err(error.stamp(&context.job_id, &operation, note_id))
            }
        }
    }

    async fn on_error(&self, error: &ActionError, data: &serde_json::Value, deps: &Dependencies) {
        self.inner.on_error(error, data, deps).await;
    }
}
