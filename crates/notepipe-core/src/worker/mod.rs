//! Per-queue worker (spec.md §4.2, §4.8).
//!
//! Generalizes the teacher's `PipelineRunner::run_wide` consumption loop
//! (`work_queue::runner`) from "drain a DB-backed queue in bounded
//! batches" to "subscribe once to a broker queue and run each delivered
//! job through a fixed action chain." Concurrency is the broker's
//! `subscribe(concurrency, ...)` parameter, not something `BaseWorker`
//! manages itself.

use std::sync::Arc;

use crate::action::{ActionContext, PipelineExecutor};
use crate::broker::{Broker, JobHandler};
use crate::database::NoteStatusUpdate;
use crate::status::{StatusBroadcaster, StatusEvent};
use crate::Dependencies;

/// Binds a name, a queue, an action chain, and shared dependencies into
/// something that can be subscribed to a [`Broker`].
pub struct BaseWorker {
    name: String,
    queue: String,
    concurrency: usize,
    executor: Arc<PipelineExecutor>,
    deps: Dependencies,
}

impl BaseWorker {
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        concurrency: usize,
        executor: PipelineExecutor,
        deps: Dependencies,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            concurrency: concurrency.max(1),
            executor: Arc::new(executor),
            deps,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Subscribes this worker's action chain to its queue on `broker`.
    /// Returns once the subscription is registered; jobs are processed on
    /// the broker's own delivery task.
    pub async fn start(&self, broker: Arc<dyn Broker>) -> Result<(), crate::broker::BrokerError> {
        let handler = Arc::new(WorkerHandler {
            worker_name: self.name.clone(),
            queue: self.queue.clone(),
            executor: self.executor.clone(),
            deps: self.deps.clone(),
        });
        broker.subscribe(&self.queue, self.concurrency, handler).await
    }
}

struct WorkerHandler {
    worker_name: String,
    queue: String,
    executor: Arc<PipelineExecutor>,
    deps: Dependencies,
}

#[async_trait::async_trait]
impl JobHandler for WorkerHandler {
    async fn handle(&self, job: crate::broker::Job) -> Result<(), anyhow::Error> {
        let mut context = ActionContext::new(job.id.clone(), self.queue.clone(), self.worker_name.clone());
        context.attempt_number = job.attempt;

        if let Some(note_id) = &job.note_id {
            if let Some(broadcaster) = &self.deps.status_broadcaster {
                broadcaster.publish(StatusEvent::info(note_id.clone(), self.queue.clone(), "started"));
            }
        }

        let queue_tags = vec![("queue".to_string(), self.queue.clone())];
        let started = std::time::Instant::now();
        let outcome = self.executor.run(job.payload.clone(), &self.deps, &context).await;
        if let Some(metrics) = &self.deps.metrics {
            metrics.observe_histogram("job_latency_ms", &queue_tags, started.elapsed().as_millis() as f64);
        }

        match outcome {
            Ok(_) => {
                tracing::debug!(worker = %self.worker_name, job_id = %job.id, "job completed");
                if let Some(metrics) = &self.deps.metrics {
                    metrics.increment_counter("jobs_processed", &queue_tags);
                }
                Ok(())
            }
            Err((action_name, error)) => {
                tracing::warn!(
                    worker = %self.worker_name,
                    job_id = %job.id,
                    action = %action_name,
                    error = %error,
                    "job failed"
                );
                if let Some(metrics) = &self.deps.metrics {
                    metrics.increment_counter("jobs_failed", &queue_tags);
                }
                if let Some(note_id) = &job.note_id {
                    if let Some(broadcaster) = &self.deps.status_broadcaster {
                        let event = StatusEvent::error(note_id.clone(), action_name.clone(), error.to_string())
                            .with_metadata(serde_json::json!({ "kind": error.kind_tag() }));
                        broadcaster.publish(event);
                    }
                    let _ = self
                        .deps
                        .database
                        .update_note(
                            note_id,
                            NoteStatusUpdate {
                                status: "failed".into(),
                                metadata: serde_json::json!({
                                    "action": action_name,
                                    "kind": error.kind_tag(),
                                }),
                            },
                        )
                        .await;
                }
                Err(anyhow::anyhow!(error))
            }
        }
    }
}
