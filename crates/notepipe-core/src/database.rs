//! Database service interface — the only persistence seam the core touches.
//!
//! The relational schema is explicitly out of scope (spec.md §1): this
//! trait is the "external database service interface" spec.md §6 names
//! (`updateNote`, `getNoteCategories`, `getNoteTags`,
//! `getQueueJobByNoteId`, plus the pattern upsert primitive). Actions and
//! the wait-for-categorization coordinator depend on `Arc<dyn Database>`;
//! nothing in this crate knows how a note, category, or tag is stored.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::broker::{Job, JobState};

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Other(#[from] anyhow::Error),
}

/// A minimal, opaque external note status record. The core only ever
/// writes it; business meaning lives outside this crate.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NoteStatusUpdate {
    pub status: String,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Update the out-of-scope "note" record's external status field.
    async fn update_note(
        &self,
        note_id: &str,
        update: NoteStatusUpdate,
    ) -> Result<(), DatabaseError>;

    /// Count of categories currently attached to a note.
    async fn get_note_categories(&self, note_id: &str) -> Result<usize, DatabaseError>;

    /// Count of tags currently attached to a note.
    async fn get_note_tags(&self, note_id: &str) -> Result<usize, DatabaseError>;

    /// Look up the broker's record of a categorization job scheduled for
    /// `note_id`, if one has been scheduled.
    async fn get_queue_job_by_note_id(
        &self,
        note_id: &str,
        queue: &str,
    ) -> Result<Option<Job>, DatabaseError>;
}

/// In-memory test double, grounded on the teacher's
/// `InMemoryRateLimitBackend` shape (a coarse lock over a `HashMap`).
///
/// Useful for unit tests and for running the pipeline standalone without
/// a real persistence layer wired in.
#[derive(Default)]
pub struct InMemoryDatabase {
    notes: Mutex<HashMap<String, NoteStatusUpdate>>,
    categories: Mutex<HashMap<String, usize>>,
    tags: Mutex<HashMap<String, usize>>,
    jobs: Mutex<HashMap<(String, String), Job>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_categories(&self, note_id: &str, count: usize) {
        self.categories
            .lock()
            .unwrap()
            .insert(note_id.to_string(), count);
    }

    pub fn set_tags(&self, note_id: &str, count: usize) {
        self.tags.lock().unwrap().insert(note_id.to_string(), count);
    }

    pub fn put_job(&self, note_id: &str, queue: &str, job: Job) {
        self.jobs
            .lock()
            .unwrap()
            .insert((note_id.to_string(), queue.to_string()), job);
    }

    pub fn set_job_state(&self, note_id: &str, queue: &str, state: JobState) {
        if let Some(job) = self
            .jobs
            .lock()
            .unwrap()
            .get_mut(&(note_id.to_string(), queue.to_string()))
        {
            job.state = state;
        }
    }

    pub fn last_note_update(&self, note_id: &str) -> Option<NoteStatusUpdate> {
        self.notes.lock().unwrap().get(note_id).cloned()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn update_note(
        &self,
        note_id: &str,
        update: NoteStatusUpdate,
    ) -> Result<(), DatabaseError> {
        self.notes
            .lock()
            .unwrap()
            .insert(note_id.to_string(), update);
        Ok(())
    }

    async fn get_note_categories(&self, note_id: &str) -> Result<usize, DatabaseError> {
        Ok(self
            .categories
            .lock()
            .unwrap()
            .get(note_id)
            .copied()
            .unwrap_or(0))
    }

    async fn get_note_tags(&self, note_id: &str) -> Result<usize, DatabaseError> {
        Ok(self.tags.lock().unwrap().get(note_id).copied().unwrap_or(0))
    }

    async fn get_queue_job_by_note_id(
        &self,
        note_id: &str,
        queue: &str,
    ) -> Result<Option<Job>, DatabaseError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .get(&(note_id.to_string(), queue.to_string()))
            .cloned())
    }
}
