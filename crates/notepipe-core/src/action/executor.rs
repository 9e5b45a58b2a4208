//! Ordered action-chain executor.
//!
//! The spec's pipeline is a linear list of actions per queue, not the
//! teacher's DAG-capable `PipelineRunner` (`work_queue::runner`): each
//! queue's worker owns one `PipelineExecutor` and runs its actions
//! strictly in the order they were registered, short-circuiting on the
//! first error. Middleware wrappers make retry/circuit-breaking per-action
//! concerns instead of executor-level ones.

use std::sync::Arc;

use super::{Action, ActionContext, ActionError, Dependencies};

/// Runs a fixed, ordered chain of actions against one job's data.
pub struct PipelineExecutor {
    actions: Vec<Arc<dyn Action>>,
}

impl PipelineExecutor {
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Self {
        Self { actions }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Runs every action in order. Returns the error from the first action
    /// that fails, along with its name, so the worker can attribute the
    /// failure in status events and logs.
    pub async fn run(
        &self,
        mut data: serde_json::Value,
        deps: &Dependencies,
        context: &ActionContext,
    ) -> Result<serde_json::Value, (String, ActionError)> {
        for action in &self.actions {
            let name = action.name();
            if let Some(err) = action.validate_input(&data) {
                return Err((name, err));
            }
            tracing::debug!(action = %name, job_id = %context.job_id, "executing action");
            let started = std::time::Instant::now();
            let result = action.execute(data, deps, context).await;
            if let Some(metrics) = &deps.metrics {
                let tags = vec![("action".to_string(), name.clone())];
                metrics.observe_histogram("action_duration_ms", &tags, started.elapsed().as_millis() as f64);
            }
            data = result.map_err(|err| (name.clone(), err))?;
        }
        Ok(data)
    }
}
