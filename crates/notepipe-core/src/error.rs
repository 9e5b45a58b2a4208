//! Error taxonomy shared across the pipeline runtime.
//!
//! Mirrors the kinds in the specification's error-handling design: actions
//! fail fast on bad input, I/O failures are retried by middleware, circuit
//! rejection is distinct from an inner failure, and a negative business
//! outcome is not an error at all (it's recorded in the pipeline data and
//! the chain continues).

use thiserror::Error;

/// Errors an [`crate::Action`] or the executor can raise.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `validate_input` rejected the job before any side effect ran.
    #[error("validation failed for action '{action}': {message}")]
    Validation { action: String, message: String },

    /// Broker, database, or broadcaster I/O failure. Retryable at the
    /// middleware layer and tolerated by wait-for-categorization.
    #[error("transient I/O error in '{operation}': {source}")]
    TransientIo {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Pattern-tracker upsert hit a unique-constraint race; retried
    /// internally up to the configured attempt limit.
    #[error("unique constraint race on pattern upsert: {0}")]
    UniqueConstraintRace(String),

    /// The circuit breaker for `key` is OPEN; the inner action was not
    /// invoked.
    #[error("Circuit breaker is OPEN for {0}")]
    CircuitOpen(String),

    /// Any other unexpected failure, classified by the caller.
    #[error("{0}")]
    Unexpected(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn validation(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            action: action.into(),
            message: message.into(),
        }
    }

    pub fn transient(operation: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::TransientIo {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// A short tag used in failure status-event metadata (spec.md §7: "an
    /// error-kind tag in metadata").
    pub fn kind_tag(&self) -> &'static str {
        match self {
            PipelineError::Validation { .. } => "validation",
            PipelineError::TransientIo { .. } => "transient_io",
            PipelineError::UniqueConstraintRace(_) => "unique_constraint_race",
            PipelineError::CircuitOpen(_) => "circuit_open",
            PipelineError::Unexpected(_) => "unexpected",
        }
    }

    /// Stamps `{jobId, operation: "<op> (<innerName>)", noteId?}` onto the
    /// error before it is rethrown (spec.md §4.3 `ErrorHandlingWrapper`).
    /// Preserves the original variant (and so `kind_tag()`) — the stamp is
    /// carried as added context, not a reclassification.
    pub fn stamp(self, job_id: &str, operation: &str, note_id: Option<&str>) -> Self {
        let context = match note_id {
            Some(note_id) => format!("jobId={job_id} operation={operation} noteId={note_id}"),
            None => format!("jobId={job_id} operation={operation}"),
        };
        match self {
            PipelineError::Validation { action, message } => PipelineError::Validation {
                action,
                message: format!("{message} ({context})"),
            },
            PipelineError::TransientIo { operation: op, source } => PipelineError::TransientIo {
                operation: op,
                source: source.context(context),
            },
            PipelineError::UniqueConstraintRace(code) => {
                PipelineError::UniqueConstraintRace(format!("{code} ({context})"))
            }
            PipelineError::CircuitOpen(key) => PipelineError::CircuitOpen(key),
            PipelineError::Unexpected(err) => PipelineError::Unexpected(err.context(context)),
        }
    }
}
