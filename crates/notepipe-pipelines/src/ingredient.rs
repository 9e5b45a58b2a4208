//! Ingredient-line actions: `process_ingredient_line`,
//! `save_ingredient_line`, `track_pattern` (spec.md §6).
//!
//! Ingredient grammar parsing is explicitly out of scope for the core;
//! `IngredientLineParser` is the external collaborator interface, with a
//! minimal regex-based default so the chain is exercisable.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, OnceLock};

use notepipe_core::action::{Action, ActionContext, ActionError, Dependencies};
use notepipe_core::pattern_tracker::PatternRule;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NormalizedLine {
    pub quantity: Option<String>,
    pub unit: Option<String>,
    pub name: String,
}

#[async_trait]
pub trait IngredientLineParser: Send + Sync {
    async fn parse(&self, raw_line: &str) -> Result<NormalizedLine, ActionError>;
}

fn quantity_unit_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?P<qty>[\d./]+)?\s*(?P<unit>\w+)?\s*(?P<name>.+)$").unwrap())
}

/// Splits a line into a leading numeric quantity, a single-word unit, and
/// the remaining text as the ingredient name. Does not resolve plurals,
/// synonyms, or fractional units — real ingredient-grammar heuristics are
/// out of scope here.
pub struct DefaultIngredientLineParser;

#[async_trait]
impl IngredientLineParser for DefaultIngredientLineParser {
    async fn parse(&self, raw_line: &str) -> Result<NormalizedLine, ActionError> {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() {
            return Err(ActionError::validation("process_ingredient_line", "empty line"));
        }

        let captures = quantity_unit_name_regex().captures(trimmed);
        let (quantity, unit, name) = match captures {
            Some(caps) => (
                caps.name("qty").map(|m| m.as_str().to_string()),
                caps.name("unit").map(|m| m.as_str().to_string()),
                caps.name("name").map(|m| m.as_str().to_string()).unwrap_or_default(),
            ),
            None => (None, None, trimmed.to_string()),
        };

        Ok(NormalizedLine { quantity, unit, name })
    }
}

pub struct ProcessIngredientLineAction {
    parser: Arc<dyn IngredientLineParser>,
}

impl ProcessIngredientLineAction {
    pub fn new(parser: Arc<dyn IngredientLineParser>) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl Action for ProcessIngredientLineAction {
    fn name(&self) -> String {
        "process_ingredient_line".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        _deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let raw_line = data
            .get("rawLine")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ActionError::validation("process_ingredient_line", "missing 'rawLine' field"))?;

        let normalized = self.parser.parse(raw_line).await?;
        let mut data = data;
        data["normalized"] = serde_json::to_value(normalized).map_err(|e| ActionError::Unexpected(e.into()))?;
        Ok(data)
    }
}

/// Turns a normalized line's present components into an ordered rule
/// sequence: quantity (if any), then unit (if any), then name (always).
fn rule_sequence(normalized: &NormalizedLine) -> Vec<PatternRule> {
    let mut rules = Vec::with_capacity(3);
    let mut number = 0u32;
    if normalized.quantity.is_some() {
        rules.push(PatternRule { rule_id: "quantity".into(), rule_number: number });
        number += 1;
    }
    if normalized.unit.is_some() {
        rules.push(PatternRule { rule_id: "unit".into(), rule_number: number });
        number += 1;
    }
    rules.push(PatternRule { rule_id: "name".into(), rule_number: number });
    rules
}

pub struct TrackPatternAction;

#[async_trait]
impl Action for TrackPatternAction {
    fn name(&self) -> String {
        "track_pattern".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let normalized: NormalizedLine = data
            .get("normalized")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ActionError::Unexpected(e.into()))?
            .ok_or_else(|| ActionError::validation("track_pattern", "missing 'normalized' field"))?;
        let raw_line = data.get("rawLine").and_then(|v| v.as_str());
        let line_id = data.get("lineIndex").map(|v| v.to_string());

        let tracker = deps
            .pattern_tracker
            .as_ref()
            .ok_or_else(|| ActionError::validation("track_pattern", "pattern tracker not configured"))?;

        let rules = rule_sequence(&normalized);
        tracker.track_pattern(&rules, raw_line, line_id.as_deref()).await?;
        Ok(data)
    }
}

pub struct SaveIngredientLineAction;

#[async_trait]
impl Action for SaveIngredientLineAction {
    fn name(&self) -> String {
        "save_ingredient_line".into()
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
            .ok_or_else(|| ActionError::validation("save_ingredient_line", "missing 'noteId' field"))?;
        let line_index = data
            .get("lineIndex")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ActionError::validation("save_ingredient_line", "missing 'lineIndex' field"))? as usize;

        let tracker = deps
            .completion_tracker
            .as_ref()
            .ok_or_else(|| ActionError::validation("save_ingredient_line", "completion tracker not configured"))?;

        tracker.mark_ingredient_line_completed(note_id, line_index).await;
        tracing::debug!(note_id, normalized = %json!(data.get("normalized")), "ingredient line saved");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notepipe_core::completion_tracker::CompletionTracker;
    use notepipe_core::database::InMemoryDatabase;
    use notepipe_core::pattern_tracker::{InMemoryPatternStore, PatternTracker};

    fn ctx() -> ActionContext {
        ActionContext::new("job-1", "ingredient", "ingredient-worker")
    }

    #[tokio::test]
    async fn process_ingredient_line_splits_quantity_unit_name() {
        let action = ProcessIngredientLineAction::new(Arc::new(DefaultIngredientLineParser));
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new()));
        let result = action
            .execute(json!({ "rawLine": "2 cups flour" }), &deps, &ctx())
            .await
            .unwrap();
        let normalized: NormalizedLine = serde_json::from_value(result["normalized"].clone()).unwrap();
        assert_eq!(normalized.quantity.as_deref(), Some("2"));
        assert_eq!(normalized.unit.as_deref(), Some("cups"));
        assert_eq!(normalized.name, "flour");
    }

    fn normalized_payload() -> serde_json::Value {
        json!({
            "rawLine": "2 cups flour",
            "lineIndex": 0,
            "normalized": NormalizedLine { quantity: Some("2".into()), unit: Some("cups".into()), name: "flour".into() },
        })
    }

    #[tokio::test]
    async fn track_pattern_requires_dependency() {
        let action = TrackPatternAction;
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new()));
        let result = action.execute(normalized_payload(), &deps, &ctx()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn track_pattern_upserts_via_tracker() {
        let store = Arc::new(InMemoryPatternStore::new());
        let tracker = Arc::new(PatternTracker::new(store.clone()));
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new())).with_pattern_tracker(tracker);
        let action = TrackPatternAction;
        action.execute(normalized_payload(), &deps, &ctx()).await.unwrap();
        assert_eq!(store.rule_count(), 1);
    }

    #[tokio::test]
    async fn save_ingredient_line_marks_completion() {
        let tracker = Arc::new(CompletionTracker::new(None));
        let deps = Dependencies::new(Arc::new(InMemoryDatabase::new())).with_completion_tracker(tracker.clone());
        let action = SaveIngredientLineAction;
        action
            .execute(json!({ "noteId": "n1", "lineIndex": 0 }), &deps, &ctx())
            .await
            .unwrap();
        assert_eq!(tracker.snapshot("n1").await.ingredient_lines_completed(), 1);
    }
}
