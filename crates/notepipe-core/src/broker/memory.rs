//! In-process broker backend.
//!
//! FIFO per queue name via an unbounded Tokio `mpsc` channel; a side table
//! of `Job` records (grounded on the teacher's
//! `Arc<RwLock<HashMap<...>>>` shape in `rate_limit::memory`) backs
//! `query()` so wait-for-categorization can observe terminal state without
//! a real database. This is the default backend — `BrokerConfig::url`
//! being unset is the "local DB" case the teacher's `Settings::broker_url`
//! documents; a durable `amqp://` backend is a drop-in replacement behind
//! the same `Broker` trait (see the `amqp-broker` / `redis-backend`
//! Cargo features).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::sync::RwLock;

use super::{Backoff, Broker, BrokerError, EnqueueOptions, Job, JobHandler, JobState};

struct QueueChannel {
    sender: mpsc::UnboundedSender<Job>,
    receiver: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

pub struct InMemoryBroker {
    queues: RwLock<HashMap<String, Arc<QueueChannel>>>,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    next_id: AtomicU64,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    async fn channel_for(&self, queue: &str) -> Arc<QueueChannel> {
        if let Some(ch) = self.queues.read().await.get(queue) {
            return ch.clone();
        }
        let mut queues = self.queues.write().await;
        queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::unbounded_channel();
                Arc::new(QueueChannel {
                    sender,
                    receiver: std::sync::Mutex::new(Some(receiver)),
                })
            })
            .clone()
    }

    fn next_job_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("job-{n}")
    }
}

fn backoff_delay(backoff: &Backoff, attempt: u32) -> Duration {
    let raw = backoff.base_delay_ms as f64 * backoff.multiplier.powi(attempt as i32);
    let capped = raw.min(backoff.max_delay_ms as f64);
    Duration::from_millis(capped.max(0.0) as u64)
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(
        &self,
        queue: &str,
        note_id: Option<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<String, BrokerError> {
        let id = self.next_job_id();
        let max_attempts = options.attempts.max(1);
        let job = Job::new(
            id.clone(),
            queue,
            note_id,
            payload,
            max_attempts,
            options.backoff,
        );

        self.jobs.write().await.insert(id.clone(), job.clone());

        let channel = self.channel_for(queue).await;
        channel
            .sender
            .send(job)
            .map_err(|_| BrokerError::Connection(format!("queue '{queue}' closed")))?;

        Ok(id)
    }

    async fn subscribe(
        &self,
        queue: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Result<(), BrokerError> {
        let channel = self.channel_for(queue).await;
        let mut receiver = channel
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BrokerError::Connection(format!("queue '{queue}' already bound")))?;

        let queue_name = queue.to_string();
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let sender = channel.sender.clone();
        let jobs = self.jobs.clone();

        tokio::spawn(async move {
            while let Some(mut job) = receiver.recv().await {
                let permit = semaphore.clone().acquire_owned().await;
                let handler = handler.clone();
                let sender = sender.clone();
                let jobs = jobs.clone();
                let queue_name = queue_name.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    job.attempt += 1;
                    {
                        let mut guard = jobs.write().await;
                        if let Some(stored) = guard.get_mut(&job.id) {
                            stored.attempt = job.attempt;
                            stored.state = JobState::Active;
                        }
                    }

                    match handler.handle(job.clone()).await {
                        Ok(()) => {
                            let mut guard = jobs.write().await;
                            if let Some(stored) = guard.get_mut(&job.id) {
                                stored.state = JobState::Completed;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                queue = %queue_name,
                                job_id = %job.id,
                                attempt = job.attempt,
                                error = %err,
                                "job execution failed"
                            );
                            if job.attempt < job.max_attempts {
                                let delay = backoff_delay(&job.backoff, job.attempt - 1);
                                {
                                    let mut guard = jobs.write().await;
                                    if let Some(stored) = guard.get_mut(&job.id) {
                                        stored.state = JobState::Delayed;
                                    }
                                }
                                tokio::time::sleep(delay).await;
                                let _ = sender.send(job);
                            } else {
                                let mut guard = jobs.write().await;
                                if let Some(stored) = guard.get_mut(&job.id) {
                                    stored.state = JobState::Failed;
                                }
                            }
                        }
                    }
                });
            }
        });

        Ok(())
    }

    async fn query(&self, queue: &str, note_id: &str) -> Result<Vec<Job>, BrokerError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.queue == queue && j.note_id.as_deref() == Some(note_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(&self, _job: Job) -> Result<(), anyhow::Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                anyhow::bail!("forced failure");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_and_subscribe_delivers_job() {
        let broker = Arc::new(InMemoryBroker::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            calls: calls.clone(),
            fail_first: false,
        });

        broker.subscribe("note", 1, handler).await.unwrap();
        broker
            .enqueue(
                "note",
                Some("n1".into()),
                serde_json::json!({}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_returns_jobs_for_note() {
        let broker = InMemoryBroker::new();
        broker
            .enqueue(
                "categorization",
                Some("n1".into()),
                serde_json::json!({}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let jobs = broker.query("categorization", "n1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].note_id.as_deref(), Some("n1"));
    }
}
