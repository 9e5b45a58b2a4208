//! Assembles a runnable deployment from [`notepipe_core::config::Settings`]:
//! in-memory backends wired through the same `Dependencies`/`ActionRegistry`
//! seams a real deployment would fill with durable ones, plus the five
//! per-queue worker chains spec.md §6 lists.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use notepipe_core::action::{Action, ActionRegistry, Dependencies};
use notepipe_core::broker::{Broker, EnqueueOptions, InMemoryBroker};
use notepipe_core::completion_tracker::CompletionTracker;
use notepipe_core::config::Settings;
use notepipe_core::database::{Database, InMemoryDatabase};
use notepipe_core::metrics::MetricsCollector;
use notepipe_core::middleware::{CircuitBreaker, ErrorHandlingWrapper, RetryWrapper};
use notepipe_core::pattern_tracker::{InMemoryPatternStore, PatternTracker};
use notepipe_core::status::{BroadcastStatusSink, StatusBroadcaster};
use notepipe_core::worker::BaseWorker;

use notepipe_pipelines::build_categorization_waiter;
use notepipe_pipelines::build_registry;

const QUEUE_NOTE: &str = "note";
const QUEUE_INGREDIENT: &str = "ingredient";
const QUEUE_INSTRUCTION: &str = "instruction";
const QUEUE_IMAGE: &str = "image";
const QUEUE_CATEGORIZATION: &str = "categorization";

/// One queue's named action chain, resolved and wrapped with the standard
/// retry/circuit-breaker/error-broadcast middleware stack.
struct QueueSpec {
    worker_name: &'static str,
    queue: &'static str,
    actions: &'static [&'static str],
}

const QUEUE_SPECS: &[QueueSpec] = &[
    QueueSpec {
        worker_name: "note-worker",
        queue: QUEUE_NOTE,
        actions: &["parse_html", "clean_html", "save_note", "wait_for_categorization", "track_completion:note"],
    },
    QueueSpec {
        worker_name: "ingredient-worker",
        queue: QUEUE_INGREDIENT,
        actions: &["process_ingredient_line", "track_pattern", "save_ingredient_line", "track_completion:ingredient"],
    },
    QueueSpec {
        worker_name: "instruction-worker",
        queue: QUEUE_INSTRUCTION,
        actions: &["no_op", "track_completion:instruction"],
    },
    QueueSpec {
        worker_name: "image-worker",
        queue: QUEUE_IMAGE,
        actions: &["process_image", "save_image", "track_completion:image"],
    },
    QueueSpec {
        worker_name: "categorization-worker",
        queue: QUEUE_CATEGORIZATION,
        actions: &["no_op"],
    },
];

/// Everything a running deployment needs: the broker/database/status
/// backends, the built-in action registry, and the settings that tune
/// retry/circuit-breaker/wait-for-categorization behavior.
pub struct App {
    settings: Settings,
    database: Arc<dyn Database>,
    broker: Arc<dyn Broker>,
    status_broadcaster: Arc<dyn StatusBroadcaster>,
    completion_tracker: Arc<CompletionTracker>,
    pattern_tracker: Arc<PatternTracker>,
    metrics: Arc<MetricsCollector>,
    registry: ActionRegistry,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        let status_broadcaster: Arc<dyn StatusBroadcaster> = Arc::new(BroadcastStatusSink::default());
        let database: Arc<dyn Database> = Arc::new(InMemoryDatabase::new());
        let completion_tracker = Arc::new(
            CompletionTracker::new(Some(status_broadcaster.clone())).with_database(database.clone()),
        );
        let pattern_tracker = Arc::new(PatternTracker::with_config(
            Arc::new(InMemoryPatternStore::new()),
            settings.pattern_tracker.clone(),
        ));
        let metrics = Arc::new(MetricsCollector::new(settings.metrics_retention.max(1)));

        Self {
            database,
            broker: Arc::new(InMemoryBroker::new()),
            status_broadcaster,
            completion_tracker,
            pattern_tracker,
            metrics,
            registry: build_registry(),
            settings,
        }
    }

    fn dependencies(&self) -> Dependencies {
        let waiter = build_categorization_waiter(
            self.broker.clone(),
            self.completion_tracker.clone(),
            self.database.clone(),
            self.settings.wait_for_categorization,
        );

        Dependencies::new(self.database.clone())
            .with_status_broadcaster(self.status_broadcaster.clone())
            .with_broker(self.broker.clone())
            .with_completion_tracker(self.completion_tracker.clone())
            .with_pattern_tracker(self.pattern_tracker.clone())
            .with_categorization_waiter(waiter)
    }

    /// Wraps a resolved leaf action with the standard middleware stack:
    /// circuit breaker innermost (guards the real action), retry around
    /// it (retries a transient failure in place), error-stamping outermost
    /// (annotates the final error with job/operation/note context once
    /// retries are exhausted; the worker, not this wrapper, broadcasts the
    /// FAILED status event for it).
    fn wrap(&self, action: Arc<dyn Action>, breaker_key: &str) -> Arc<dyn Action> {
        let breaker = Arc::new(CircuitBreaker::new(action, breaker_key, self.settings.circuit_breaker));
        let retried = Arc::new(RetryWrapper::new(breaker, self.settings.retry));
        Arc::new(ErrorHandlingWrapper::new(retried))
    }

    fn build_worker(&self, spec: &QueueSpec) -> anyhow::Result<BaseWorker> {
        let chain = self
            .registry
            .build_chain(spec.actions)
            .map_err(|err| anyhow::anyhow!(err))?
            .into_iter()
            .map(|action| {
                let key = format!("{}:{}", spec.queue, action.name());
                self.wrap(action, &key)
            })
            .collect();

        Ok(BaseWorker::new(
            spec.worker_name,
            spec.queue,
            self.settings.worker.concurrency,
            notepipe_core::action::PipelineExecutor::new(chain),
            self.dependencies(),
        ))
    }

    /// Starts the worker bound to `queue`, or every queue's worker if
    /// `queue` is `None`, then parks until the process is signaled to stop.
    pub async fn run_worker(&self, queue: Option<&str>) -> anyhow::Result<()> {
        let specs: Vec<&QueueSpec> = match queue {
            Some(queue) => {
                let spec = QUEUE_SPECS
                    .iter()
                    .find(|spec| spec.queue == queue)
                    .ok_or_else(|| anyhow::anyhow!("unknown queue '{queue}'"))?;
                vec![spec]
            }
            None => QUEUE_SPECS.iter().collect(),
        };

        for spec in specs {
            let worker = self.build_worker(spec)?;
            worker.start(self.broker.clone()).await?;
            tracing::info!(worker = spec.worker_name, queue = spec.queue, "worker started");
        }

        tracing::info!("press ctrl-c to stop");
        tokio::signal::ctrl_c().await?;
        Ok(())
    }

    /// Reads an HTML file from disk and enqueues it as a `note` job.
    pub async fn enqueue_note(&self, path: &Path, import_id: Option<String>) -> anyhow::Result<()> {
        let html = std::fs::read_to_string(path)?;
        let import_id = import_id.unwrap_or_else(|| path.to_string_lossy().to_string());

        let job_id = self
            .broker
            .enqueue(
                QUEUE_NOTE,
                None,
                serde_json::json!({ "html": html, "importId": import_id }),
                EnqueueOptions {
                    attempts: self.settings.worker.max_attempts,
                    ..Default::default()
                },
            )
            .await?;

        println!("enqueued note job {job_id}");
        Ok(())
    }

    /// Prints the completion-tracker snapshot for a note.
    pub async fn print_status(&self, note_id: &str) -> anyhow::Result<()> {
        let snapshot = self.completion_tracker.snapshot(note_id).await;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        Ok(())
    }

    /// Serves the status/metrics HTTP transport. Workers run as separate
    /// `run-worker` processes sharing the same broker/status backend in a
    /// real deployment; here, for standalone operation, the in-memory
    /// backends are only reachable from the process that constructed them.
    pub async fn serve(&self, addr: SocketAddr) -> anyhow::Result<()> {
        let state = notepipe_server::AppState::new(self.status_broadcaster.clone(), self.metrics.clone());
        notepipe_server::serve(addr, state).await
    }
}
