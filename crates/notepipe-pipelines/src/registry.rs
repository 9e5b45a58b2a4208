//! Wires the concrete actions in this crate into a `notepipe_core`
//! `ActionRegistry`, keyed by the names spec.md §6 lists. `track_completion`
//! is parameterized by worker kind, so it registers under one name per
//! kind (`track_completion:note`, `track_completion:ingredient`, ...)
//! rather than a single bare name. Categorization is not one of the
//! tracked kinds — it has no `track_completion` action of its own.

use std::sync::Arc;

use notepipe_core::action::{Action, ActionRegistry};
use notepipe_core::completion_tracker::WorkerKind;

use crate::error_handling::{CaptureErrorAction, ErrorRecoveryAction, LogErrorAction};
use crate::flow::{NoOpAction, ScheduleCategorizationAction, TrackCompletionAction, WaitForCategorizationAction};
use crate::html::{CleanHtmlAction, DefaultHtmlCleaner, DefaultHtmlParser, ParseHtmlAction};
use crate::image::{DefaultImageProcessor, ProcessImageAction, SaveImageAction};
use crate::ingredient::{DefaultIngredientLineParser, ProcessIngredientLineAction, SaveIngredientLineAction, TrackPatternAction};
use crate::note::SaveNoteAction;

pub fn track_completion_name(kind: WorkerKind) -> &'static str {
    match kind {
        WorkerKind::Note => "track_completion:note",
        WorkerKind::Ingredient => "track_completion:ingredient",
        WorkerKind::Instruction => "track_completion:instruction",
        WorkerKind::Image => "track_completion:image",
    }
}

/// Builds the full registry with default domain-service implementations.
/// A deployment with real HTML/ingredient/image heuristics constructs its
/// own registry instead, swapping in its own `HtmlParser`/
/// `IngredientLineParser`/`ImageProcessor` implementations.
pub fn build_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    registry.register(
        "parse_html",
        Arc::new(|| Arc::new(ParseHtmlAction::new(Arc::new(DefaultHtmlParser))) as Arc<dyn Action>),
    );
    registry.register(
        "clean_html",
        Arc::new(|| Arc::new(CleanHtmlAction::new(Arc::new(DefaultHtmlCleaner))) as Arc<dyn Action>),
    );
    registry.register("save_note", Arc::new(|| Arc::new(SaveNoteAction) as Arc<dyn Action>));
    registry.register(
        "wait_for_categorization",
        Arc::new(|| Arc::new(WaitForCategorizationAction) as Arc<dyn Action>),
    );
    registry.register(
        "schedule_categorization",
        Arc::new(|| Arc::new(ScheduleCategorizationAction) as Arc<dyn Action>),
    );
    registry.register("log_error", Arc::new(|| Arc::new(LogErrorAction) as Arc<dyn Action>));
    registry.register("capture_error", Arc::new(|| Arc::new(CaptureErrorAction) as Arc<dyn Action>));
    registry.register(
        "error_recovery",
        Arc::new(|| Arc::new(ErrorRecoveryAction::new("category", serde_json::json!("uncategorized"))) as Arc<dyn Action>),
    );
    registry.register("no_op", Arc::new(|| Arc::new(NoOpAction) as Arc<dyn Action>));

    registry.register(
        "process_ingredient_line",
        Arc::new(|| Arc::new(ProcessIngredientLineAction::new(Arc::new(DefaultIngredientLineParser))) as Arc<dyn Action>),
    );
    registry.register(
        "save_ingredient_line",
        Arc::new(|| Arc::new(SaveIngredientLineAction) as Arc<dyn Action>),
    );
    registry.register("track_pattern", Arc::new(|| Arc::new(TrackPatternAction) as Arc<dyn Action>));

    registry.register(
        "process_image",
        Arc::new(|| Arc::new(ProcessImageAction::new(Arc::new(DefaultImageProcessor))) as Arc<dyn Action>),
    );
    registry.register("save_image", Arc::new(|| Arc::new(SaveImageAction) as Arc<dyn Action>));

    for kind in [
        WorkerKind::Note,
        WorkerKind::Ingredient,
        WorkerKind::Instruction,
        WorkerKind::Image,
    ] {
        registry.register(
            track_completion_name(kind),
            Arc::new(move || Arc::new(TrackCompletionAction::new(kind)) as Arc<dyn Action>),
        );
    }

    registry
}
