//! `save_note` action (spec.md §6).
//!
//! Persists the cleaned note, registers the counted fan-out totals with
//! the completion tracker, then enqueues one job per ingredient line, one
//! instruction batch job, and one job per image — the three sibling
//! enqueues spec.md §2's data-flow paragraph describes.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use notepipe_core::action::{Action, ActionContext, ActionError, Dependencies};
use notepipe_core::broker::EnqueueOptions;
use notepipe_core::database::NoteStatusUpdate;

use crate::html::ParsedNote;

pub const QUEUE_INGREDIENT: &str = "ingredient";
pub const QUEUE_INSTRUCTION: &str = "instruction";
pub const QUEUE_IMAGE: &str = "image";

pub struct SaveNoteAction;

#[async_trait]
impl Action for SaveNoteAction {
    fn name(&self) -> String {
        "save_note".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        deps: &Dependencies,
        context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let parsed: ParsedNote = data
            .get("parsed")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ActionError::Unexpected(e.into()))?
            .ok_or_else(|| ActionError::validation("save_note", "missing 'parsed' field"))?;

        let note_id = data
            .get("noteId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let import_id = data
            .get("importId")
            .and_then(|v| v.as_str())
            .unwrap_or(&context.job_id)
            .to_string();

        deps.database
            .update_note(
                &note_id,
                NoteStatusUpdate {
                    status: "saved".into(),
                    metadata: json!({ "title": parsed.title }),
                },
            )
            .await
            .map_err(|e| ActionError::transient("save_note", e))?;

        let broker = deps
            .broker
            .as_ref()
            .ok_or_else(|| ActionError::validation("save_note", "broker dependency not configured"))?;
        let tracker = deps
            .completion_tracker
            .as_ref()
            .ok_or_else(|| ActionError::validation("save_note", "completion tracker dependency not configured"))?;

        tracker.set_total_ingredient_lines(&note_id, parsed.ingredient_lines.len()).await;
        tracker.set_total_image_jobs(&note_id, parsed.image_urls.len()).await;

        for (index, line) in parsed.ingredient_lines.iter().enumerate() {
            broker
                .enqueue(
                    QUEUE_INGREDIENT,
                    Some(note_id.clone()),
                    json!({
                        "importId": import_id,
                        "noteId": note_id,
                        "lineIndex": index,
                        "rawLine": line,
                    }),
                    EnqueueOptions::default(),
                )
                .await
                .map_err(|e| ActionError::transient("save_note", e))?;
        }

        broker
            .enqueue(
                QUEUE_INSTRUCTION,
                Some(note_id.clone()),
                json!({
                    "importId": import_id,
                    "noteId": note_id,
                    "lines": parsed.instruction_lines,
                }),
                EnqueueOptions::default(),
            )
            .await
            .map_err(|e| ActionError::transient("save_note", e))?;

        for url in &parsed.image_urls {
            broker
                .enqueue(
                    QUEUE_IMAGE,
                    Some(note_id.clone()),
                    json!({
                        "importId": import_id,
                        "noteId": note_id,
                        "imageUrl": url,
                    }),
                    EnqueueOptions::default(),
                )
                .await
                .map_err(|e| ActionError::transient("save_note", e))?;
        }

        let mut data = data;
        data["noteId"] = json!(note_id);
        data["importId"] = json!(import_id);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notepipe_core::broker::{Broker, InMemoryBroker};
    use notepipe_core::completion_tracker::CompletionTracker;
    use notepipe_core::database::InMemoryDatabase;
    use std::sync::Arc;

    #[tokio::test]
    async fn fans_out_one_job_per_ingredient_line_and_image() {
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let tracker = Arc::new(CompletionTracker::new(None));
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new()))
            .with_broker(broker.clone())
            .with_completion_tracker(tracker.clone());
        let ctx = ActionContext::new("job-1", "note", "note-worker");

        let parsed = ParsedNote {
            title: "Soup".into(),
            ingredient_lines: vec!["2 cups water".into(), "1 tsp salt".into()],
            image_urls: vec!["http://example.invalid/a.jpg".into()],
            ..Default::default()
        };

        let action = SaveNoteAction;
        let result = action
            .execute(json!({ "parsed": parsed, "importId": "imp-1" }), &deps, &ctx)
            .await
            .unwrap();

        let note_id = result["noteId"].as_str().unwrap().to_string();
        assert_eq!(broker.query(QUEUE_INGREDIENT, &note_id).await.unwrap().len(), 2);
        assert_eq!(broker.query(QUEUE_IMAGE, &note_id).await.unwrap().len(), 1);
        assert_eq!(broker.query(QUEUE_INSTRUCTION, &note_id).await.unwrap().len(), 1);

        let snapshot = tracker.snapshot(&note_id).await;
        assert_eq!(snapshot.ingredient_lines_total, Some(2));
        assert_eq!(snapshot.image_jobs_total, Some(1));
    }

    #[tokio::test]
    async fn requires_parsed_field() {
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new()));
        let ctx = ActionContext::new("job-1", "note", "note-worker");
        let action = SaveNoteAction;
        let result = action.execute(json!({}), &deps, &ctx).await;
        assert!(result.is_err());
    }
}
