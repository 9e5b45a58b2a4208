//! Explicit error-path actions: `log_error`, `capture_error`,
//! `error_recovery` (spec.md §6).
//!
//! These are ordinary chain actions, distinct from the `ErrorHandlingWrapper`
//! middleware: a worker can route a job into an explicit error-handling
//! sub-chain (e.g. after a `TerminalBusinessFailure` recorded in `data`
//! rather than thrown) instead of only relying on wrapper-level recovery.

use async_trait::async_trait;
use serde_json::json;

use notepipe_core::action::{Action, ActionContext, ActionError, Dependencies};

/// Logs whatever error context is present in `data["error"]` at warn
/// level and passes the data through unchanged.
pub struct LogErrorAction;

#[async_trait]
impl Action for LogErrorAction {
    fn name(&self) -> String {
        "log_error".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        _deps: &Dependencies,
        context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let error = data.get("error").cloned().unwrap_or(serde_json::Value::Null);
        tracing::warn!(job_id = %context.job_id, error = %error, "pipeline error logged");
        Ok(data)
    }
}

/// Snapshots the current error into `data["capturedErrors"]`, an
/// append-only array, so downstream actions (or a final status event)
/// can report the full error history for a job rather than only the last
/// one.
pub struct CaptureErrorAction;

#[async_trait]
impl Action for CaptureErrorAction {
    fn name(&self) -> String {
        "capture_error".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        _deps: &Dependencies,
        context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let mut data = data;
        let error = data.get("error").cloned().unwrap_or(serde_json::Value::Null);
        let entry = json!({
            "action": context.operation,
            "attempt": context.attempt_number,
            "error": error,
        });

        match data.get_mut("capturedErrors").and_then(|v| v.as_array_mut()) {
            Some(array) => array.push(entry),
            None => data["capturedErrors"] = json!([entry]),
        }

        Ok(data)
    }
}

/// Applies a caller-supplied fallback value for `field` when it is
/// missing or null, so a downstream action that requires it can still
/// run. Not a substitute for the business-level recovery heuristics the
/// specification treats as out of scope — this only prevents a missing
/// field from being a hard failure.
pub struct ErrorRecoveryAction {
    field: String,
    fallback: serde_json::Value,
}

impl ErrorRecoveryAction {
    pub fn new(field: impl Into<String>, fallback: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            fallback,
        }
    }
}

#[async_trait]
impl Action for ErrorRecoveryAction {
    fn name(&self) -> String {
        "error_recovery".into()
    }

    async fn execute(
        &self,
        data: serde_json::Value,
        _deps: &Dependencies,
        _context: &ActionContext,
    ) -> Result<serde_json::Value, ActionError> {
        let mut data = data;
        let needs_fallback = data.get(&self.field).map(|v| v.is_null()).unwrap_or(true);
        if needs_fallback {
            data[&self.field] = self.fallback.clone();
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notepipe_core::database::InMemoryDatabase;
    use std::sync::Arc;

    fn deps() -> Dependencies {
        Dependencies::new(Arc::new(InMemoryDatabase::new()))
    }

    fn ctx() -> ActionContext {
        ActionContext::new("job-1", "note", "worker")
    }

    #[tokio::test]
    async fn capture_error_appends_to_existing_array() {
        let action = CaptureErrorAction;
        let input = json!({ "error": "boom", "capturedErrors": [{"action": "prior"}] });
        let result = action.execute(input, &deps(), &ctx()).await.unwrap();
        assert_eq!(result["capturedErrors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn error_recovery_fills_missing_field() {
        let action = ErrorRecoveryAction::new("category", json!("uncategorized"));
        let result = action.execute(json!({}), &deps(), &ctx()).await.unwrap();
        assert_eq!(result["category"], json!("uncategorized"));
    }

    #[tokio::test]
    async fn error_recovery_leaves_present_field_untouched() {
        let action = ErrorRecoveryAction::new("category", json!("uncategorized"));
        let result = action.execute(json!({ "category": "soup" }), &deps(), &ctx()).await.unwrap();
        assert_eq!(result["category"], json!("soup"));
    }
}
