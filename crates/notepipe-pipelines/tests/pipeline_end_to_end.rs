//! Drives one note through every queue's real worker chain against the
//! in-memory broker/database/pattern-store backends, the way `notepipe-cli`
//! wires them at startup. Exercises the cross-module invariants spec.md §8
//! describes in prose rather than any single crate's unit tests: the
//! ingredient/instruction/image fan-out, the completion tracker's terminal
//! broadcast, and wait-for-categorization's bridge into a scheduled job.

use std::sync::Arc;
use std::time::Duration;

use notepipe_core::action::{ActionRegistry, Dependencies, PipelineExecutor};
use notepipe_core::broker::{Broker, EnqueueOptions, InMemoryBroker};
use notepipe_core::completion_tracker::CompletionTracker;
use notepipe_core::database::{Database, InMemoryDatabase};
use notepipe_core::pattern_tracker::{InMemoryPatternStore, PatternTracker};
use notepipe_core::status::{BroadcastStatusSink, StatusBroadcaster, StatusKind};
use notepipe_core::wait_for_categorization::WaitForCategorizationConfig;
use notepipe_core::worker::BaseWorker;

use notepipe_pipelines::flow::QUEUE_CATEGORIZATION;
use notepipe_pipelines::{build_categorization_waiter, build_registry};

const NOTE_HTML: &str = r#"
<html><body>
<h1>Soup</h1>
<ul class="ingredients">
  <li>2 cups water</li>
  <li>1 tsp salt</li>
</ul>
<ul class="instructions">
  <li>Boil the water</li>
</ul>
<img src="http://example.invalid/soup.jpg">
</body></html>
"#;

async fn start_worker(
    registry: &ActionRegistry,
    broker: &Arc<dyn Broker>,
    name: &'static str,
    queue: &'static str,
    actions: &[&str],
    deps: Dependencies,
) {
    let chain = registry.build_chain(actions).expect("all actions registered");
    let worker = BaseWorker::new(name, queue, 2, PipelineExecutor::new(chain), deps);
    worker.start(broker.clone()).await.expect("worker subscribes");
}

#[tokio::test]
async fn note_fans_out_and_reaches_terminal_completion() {
    let note_id = "integration-note-1";
    let import_id = "integration-import-1";

    let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
    let mem_db = Arc::new(InMemoryDatabase::new());
    mem_db.set_categories(note_id, 1);
    let database: Arc<dyn Database> = mem_db.clone();
    let status: Arc<dyn StatusBroadcaster> = Arc::new(BroadcastStatusSink::new(64));
    let completion_tracker =
        Arc::new(CompletionTracker::new(Some(status.clone())).with_database(database.clone()));
    let pattern_store = Arc::new(InMemoryPatternStore::new());
    let pattern_tracker = Arc::new(PatternTracker::new(pattern_store.clone()));
    let waiter = build_categorization_waiter(
        broker.clone(),
        completion_tracker.clone(),
        database.clone(),
        WaitForCategorizationConfig {
            max_retries: 100,
            retry_delay_ms: 10,
            log_throttle_ms: 5_000,
        },
    );

    let base_deps = Dependencies::new(database.clone())
        .with_status_broadcaster(status.clone())
        .with_broker(broker.clone())
        .with_completion_tracker(completion_tracker.clone())
        .with_pattern_tracker(pattern_tracker.clone())
        .with_categorization_waiter(waiter);

    let registry = build_registry();

    start_worker(
        &registry,
        &broker,
        "note-worker",
        "note",
        &["parse_html", "clean_html", "save_note", "wait_for_categorization", "track_completion:note"],
        base_deps.clone(),
    )
    .await;
    start_worker(
        &registry,
        &broker,
        "ingredient-worker",
        "ingredient",
        &["process_ingredient_line", "track_pattern", "save_ingredient_line", "track_completion:ingredient"],
        base_deps.clone(),
    )
    .await;
    start_worker(
        &registry,
        &broker,
        "instruction-worker",
        "instruction",
        &["no_op", "track_completion:instruction"],
        base_deps.clone(),
    )
    .await;
    start_worker(
        &registry,
        &broker,
        "image-worker",
        "image",
        &["process_image", "save_image", "track_completion:image"],
        base_deps.clone(),
    )
    .await;
    start_worker(&registry, &broker, "categorization-worker", "categorization", &["no_op"], base_deps.clone()).await;

    let mut status_rx = status.subscribe();

    broker
        .enqueue(
            "note",
            Some(note_id.to_string()),
            serde_json::json!({ "html": NOTE_HTML, "noteId": note_id, "importId": import_id }),
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

    let saw_terminal_event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = status_rx.recv().await.expect("status channel stays open");
            if event.status == StatusKind::Completed
                && event.context == "note_completion"
                && event.note_id.as_deref() == Some(note_id)
            {
                return true;
            }
        }
    })
    .await
    .expect("note reaches terminal completion within the timeout");
    assert!(saw_terminal_event);

    // The completion tracker's terminal protocol updates the note's status
    // record to "completed" before broadcasting (spec.md §4.4 step 2), so
    // by the time the terminal event above has been observed this has
    // already overwritten `save_note`'s earlier "saved" update.
    let note_update = mem_db.last_note_update(note_id).expect("save_note recorded a status update");
    assert_eq!(note_update.status, "completed");

    let categorization_jobs = broker.query(QUEUE_CATEGORIZATION, note_id).await.unwrap();
    assert_eq!(categorization_jobs.len(), 1);

    assert!(pattern_store.rule_count() >= 1);
}
