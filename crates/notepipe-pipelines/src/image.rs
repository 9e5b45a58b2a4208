//! Image actions: `process_image`, `save_image` (spec.md §6).
//!
//! Image file handling is explicitly out of scope for the core; this
//! crate only carries the seam (`ImageProcessor`) and a default that
//! validates a URL shape without touching the network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use notepipe_core::action::{Action, ActionContext, ActionError, Dependencies};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ImageArtifact {
    pub source_url: String,
    pub stored_path: String,
}

#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn process(&self, image_url: &str) -> Result<ImageArtifact, ActionError>;
}

/// Derives a deterministic stored path from the URL without fetching it.
/// Real image handling (download, resize, content-type sniffing) is out
/// of scope for the pipeline runtime.
pub struct DefaultImageProcessor;

#[async_trait]
impl ImageProcessor for DefaultImageProcessor {
    async fn process(&self, image_url: &str) -> Result<ImageArtifact, ActionError> {
        if image_url.trim().is_empty() {
            return Err(ActionError::validation("process_image", "empty image url"));
        }
        let digest = image_url.len();
        Ok(ImageArtifact {
            source_url: image_url.to_string(),
            stored_path: format!("images/{digest:x}.bin", digest = digest),
        })
    }
}

pub struct ProcessImageAction {
    processor: Arc<dyn ImageProcessor>,
}

impl ProcessImageAction {
    pub fn new(processor: Arc<dyn ImageProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl Action for ProcessImageAction {
    fn name(&self) -> String {
        "process_image".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        _deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let image_url = data
            .get("imageUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::validation("process_image", "missing 'imageUrl' field"))?;

        let artifact = self.processor.process(image_url).await?;
        let mut data = data;
        data["artifact"] = serde_json::to_value(artifact).map_err(|e| ActionError::Unexpected(e.into()))?;
        Ok(data)
    }
}

pub struct SaveImageAction;

#[async_trait]
impl Action for SaveImageAction {
    fn name(&self) -> String {
        "save_image".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let note_id = data
            .get("noteId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::validation("save_image", "missing 'noteId' field"))?;

        let tracker = deps
            .completion_tracker
            .as_ref()
            .ok_or_else(|| ActionError::validation("save_image", "completion tracker not configured"))?;

        tracker.mark_image_job_completed(note_id).await;
        tracing::debug!(note_id, artifact = %json!(data.get("artifact")), "image saved");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notepipe_core::completion_tracker::CompletionTracker;
    use notepipe_core::database::InMemoryDatabase;

    fn ctx() -> ActionContext {
        ActionContext::new("job-1", "image", "image-worker")
    }

    #[tokio::test]
    async fn process_image_rejects_empty_url() {
        let action = ProcessImageAction::new(Arc::new(DefaultImageProcessor));
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new()));
        let result = action.execute(json!({ "imageUrl": "" }), &deps, &ctx()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn save_image_marks_completion() {
        let tracker = Arc::new(CompletionTracker::new(None));
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new())).with_completion_tracker(tracker.clone());
        let action = SaveImageAction;
        action.execute(json!({ "noteId": "n1" }), &deps, &ctx()).await.unwrap();
        assert_eq!(tracker.snapshot("n1").await.image_jobs_completed, 1);
    }
}
