//! Cross-queue completion join (spec.md §3, §4.4).
//!
//! A note fans out into four independent worker completions (note,
//! instruction, ingredient, image) plus two counted sub-fan-outs (image
//! jobs, ingredient lines). The tracker joins all of them behind one
//! `Arc<RwLock<HashMap<note_id, NoteCompletionStatus>>>`
//! (`rate_limit::memory` shape again), and publishes exactly one terminal
//! `StatusEvent` the instant every required signal has arrived.
//!
//! The "is every condition satisfied" check and the `completed = true`
//! claim happen inside the *same* write-lock acquisition
//! (`NoteCompletionStatus::claim_if_newly_complete`), so at most one
//! `mark_*` caller ever observes the claim succeed for a given note —
//! required for exactly-once terminal emission under at-least-once,
//! possibly-concurrent redelivery (spec.md §5, §8 testable property 1).
//! Only the database update, broadcast, and cleanup that *follow* a
//! successful claim happen outside that lock.
//!
//! Categorization is deliberately not one of the four joined workers:
//! spec.md §4.5 schedules it only after ingredient processing drains, and
//! the wait-for-categorization coordinator observes its completion
//! through the broker/database, not through this tracker.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::database::{Database, NoteStatusUpdate};
use crate::status::{StatusBroadcaster, StatusEvent, StatusKind};

/// The four independent worker completions spec.md §4.5 names
/// (`markWorkerCompleted(noteId, kind ∈ {note, instruction, ingredient,
/// image})`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerKind {
    Note,
    Instruction,
    Ingredient,
    Image,
}

/// Per-note join state (spec.md §3: `NoteCompletionStatus`). Fields are
/// private: callers only ever mutate state through `CompletionTracker`'s
/// methods so the "mark once" and "count down" invariants can't be
/// bypassed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteCompletionStatus {
    pub import_id: Option<String>,
    pub note_done: bool,
    pub instruction_done: bool,
    pub ingredient_done: bool,
    /// Set directly by `mark_worker_done(Image)`, or automatically once
    /// `image_jobs_completed` reaches `image_jobs_total` (spec.md §4.4
    /// `markImageJobCompleted` table row).
    image_done_explicit: bool,
    pub image_jobs_total: Option<usize>,
    pub image_jobs_completed: usize,
    pub ingredient_lines_total: Option<usize>,
    ingredient_lines_seen: std::collections::BTreeSet<usize>,
    pub completed: bool,
}

/// Derived view consumed by wait-for-categorization (spec.md §4.4:
/// `getIngredientCompletionStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IngredientCompletionStatus {
    pub completed: usize,
    pub total: usize,
    pub is_complete: bool,
}

impl IngredientCompletionStatus {
    /// The reference `"c/t"` string format spec.md §4.4 documents.
    pub fn ratio(&self) -> String {
        format!("{}/{}", self.completed, self.total)
    }

    fn absent() -> Self {
        Self {
            completed: 0,
            total: 0,
            is_complete: false,
        }
    }
}

impl NoteCompletionStatus {
    pub fn ingredient_lines_completed(&self) -> usize {
        self.ingredient_lines_seen.len()
    }

    fn images_satisfied(&self) -> bool {
        self.image_done_explicit
            || match self.image_jobs_total {
                Some(total) => self.image_jobs_completed >= total,
                None => true,
            }
    }

    fn ingredient_lines_satisfied(&self) -> bool {
        match self.ingredient_lines_total {
            Some(total) => self.ingredient_lines_completed() >= total,
            None => true,
        }
    }

    fn ingredient_completion_status(&self) -> IngredientCompletionStatus {
        let total = self.ingredient_lines_total.unwrap_or(0);
        let completed = self.ingredient_lines_completed();
        IngredientCompletionStatus {
            completed,
            total,
            is_complete: matches!(self.ingredient_lines_total, Some(t) if completed >= t),
        }
    }

    /// All join conditions satisfied and the terminal event has not yet
    /// fired for this note (spec.md §3 invariant 2).
    fn is_newly_complete(&self) -> bool {
        !self.completed
            && self.note_done
            && self.instruction_done
            && self.ingredient_done
            && self.images_satisfied()
            && self.ingredient_lines_satisfied()
    }

    /// Atomically checks and claims the terminal transition: if every join
    /// condition is satisfied and no caller has claimed it yet, flips
    /// `completed` and returns `true` in the same step so a caller holding
    /// the write lock is the *only* caller that can ever observe `true`
    /// for a given note (spec.md §3 invariant 2, §5 "one critical
    /// decision").
    fn claim_if_newly_complete(&mut self) -> bool {
        if self.is_newly_complete() {
            self.completed = true;
            true
        } else {
            false
        }
    }
}

pub struct CompletionTracker {
    states: Arc<RwLock<HashMap<String, NoteCompletionStatus>>>,
    broadcaster: Option<Arc<dyn StatusBroadcaster>>,
    database: Option<Arc<dyn Database>>,
}

impl CompletionTracker {
    pub fn new(broadcaster: Option<Arc<dyn StatusBroadcaster>>) -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
            broadcaster,
            database: None,
        }
    }

    /// Attaches the database handle the terminal protocol uses to update
    /// the note's external status record before broadcasting (spec.md
    /// §4.4 terminal protocol step 2). Optional: tests and callers with no
    /// external record to update may leave this unset.
    pub fn with_database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    /// Overwrites any prior entry for `note_id` (spec.md §4.4 `initialize`).
    pub async fn initialize(&self, note_id: &str, import_id: &str) {
        let mut states = self.states.write().await;
        states.insert(
            note_id.to_string(),
            NoteCompletionStatus {
                import_id: Some(import_id.to_string()),
                ..Default::default()
            },
        );
    }

    pub async fn snapshot(&self, note_id: &str) -> NoteCompletionStatus {
        self.states.read().await.get(note_id).cloned().unwrap_or_default()
    }

    pub async fn ingredient_completion_status(&self, note_id: &str) -> IngredientCompletionStatus {
        self.states
            .read()
            .await
            .get(note_id)
            .map(NoteCompletionStatus::ingredient_completion_status)
            .unwrap_or_else(IngredientCompletionStatus::absent)
    }

    /// Marks one of the four per-note worker completions done. Calling
    /// this twice for the same note and kind is a no-op (idempotent under
    /// at-least-once delivery).
    pub async fn mark_worker_done(&self, note_id: &str, kind: WorkerKind) {
        let claimed = {
            let mut states = self.states.write().await;
            let entry = states.entry(note_id.to_string()).or_default();
            match kind {
                WorkerKind::Note => entry.note_done = true,
                WorkerKind::Instruction => entry.instruction_done = true,
                WorkerKind::Ingredient => entry.ingredient_done = true,
                WorkerKind::Image => entry.image_done_explicit = true,
            }
            entry.claim_if_newly_complete().then(|| entry.import_id.clone())
        };
        if let Some(import_id) = claimed {
            self.finish_terminal(note_id, import_id).await;
        }
    }

    /// Registers the expected count for a counted fan-out (image jobs or
    /// ingredient lines). Safe to call more than once with the same
    /// value; autocreates the entry if absent (spec.md §4.4).
    pub async fn set_total_image_jobs(&self, note_id: &str, total: usize) {
        let claimed = {
            let mut states = self.states.write().await;
            let entry = states.entry(note_id.to_string()).or_default();
            entry.image_jobs_total = Some(total);
            entry.claim_if_newly_complete().then(|| entry.import_id.clone())
        };
        if let Some(import_id) = claimed {
            self.finish_terminal(note_id, import_id).await;
        }
    }

    pub async fn set_total_ingredient_lines(&self, note_id: &str, total: usize) {
        let claimed = {
            let mut states = self.states.write().await;
            let entry = states.entry(note_id.to_string()).or_default();
            entry.ingredient_lines_total = Some(total);
            entry.claim_if_newly_complete().then(|| entry.import_id.clone())
        };
        if let Some(import_id) = claimed {
            self.finish_terminal(note_id, import_id).await;
        }
    }

    /// Autocreates the entry if absent (spec.md §9 Open Question 1: the
    /// autocreate-on-absent behavior is retained by contract rather than
    /// rejected as a precondition violation).
    pub async fn mark_image_job_completed(&self, note_id: &str) {
        let claimed = {
            let mut states = self.states.write().await;
            let entry = states.entry(note_id.to_string()).or_default();
            entry.image_jobs_completed += 1;
            if entry.images_satisfied() {
                entry.image_done_explicit = true;
            }
            entry.claim_if_newly_complete().then(|| entry.import_id.clone())
        };
        if let Some(import_id) = claimed {
            self.finish_terminal(note_id, import_id).await;
        }
    }

    /// Idempotent: marking the same `line_index` twice does not advance
    /// the completed-line count (spec.md §8 testable property 2).
    pub async fn mark_ingredient_line_completed(&self, note_id: &str, line_index: usize) {
        let claimed = {
            let mut states = self.states.write().await;
            let entry = states.entry(note_id.to_string()).or_default();
            entry.ingredient_lines_seen.insert(line_index);
            entry.claim_if_newly_complete().then(|| entry.import_id.clone())
        };
        if let Some(import_id) = claimed {
            self.finish_terminal(note_id, import_id).await;
        }
    }

    /// Removes the entry if present. Idempotent (spec.md §8 testable
    /// property 3).
    pub async fn cleanup(&self, note_id: &str) {
        self.states.write().await.remove(note_id);
    }

    /// Runs the terminal protocol for a note whose completion this call
    /// has *already claimed* inside the mutation's own lock acquisition
    /// (`claim_if_newly_complete`). Because only one `mark_*` call can ever
    /// observe the claim succeed for a given note, this runs at most once
    /// per note — there is no second, separate lock acquisition here that
    /// a concurrent caller could race against (spec.md §5: "terminal
    /// broadcast + cleanup must be one critical decision").
    async fn finish_terminal(&self, note_id: &str, import_id: Option<String>) {
        // Best-effort external status update before the broadcast (spec.md
        // §4.4 terminal protocol step 2). Failure is logged and does not
        // block the broadcast or cleanup (step 3).
        if let Some(database) = &self.database {
            if let Err(err) = database
                .update_note(
                    note_id,
                    NoteStatusUpdate {
                        status: "completed".into(),
                        metadata: serde_json::json!({ "noteId": note_id }),
                    },
                )
                .await
            {
                tracing::warn!(note_id, error = %err, "failed to update note status record on completion");
            }
        }
        self.broadcast_completed(note_id, import_id).await;
        // Cleanup happens regardless of broadcast/update success (spec.md
        // §4.4 terminal protocol step 3).
        self.cleanup(note_id).await;
    }

    async fn broadcast_completed(&self, note_id: &str, import_id: Option<String>) {
        tracing::info!(note_id, "note processing completed");
        if let Some(broadcaster) = &self.broadcaster {
            let mut event = StatusEvent::new(StatusKind::Completed, "note_completion", "note processing complete")
                .with_note_id(note_id)
                .with_metadata(serde_json::json!({ "noteId": note_id }));
            if let Some(import_id) = import_id {
                event = event.with_import_id(import_id);
            }
            broadcaster.publish(event);
        }
    }
}
