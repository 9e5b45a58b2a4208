//! Cross-worker status fan-out (spec.md §4.7, §6).
//!
//! One broadcast channel per process; every worker, the completion
//! tracker, and the wait-for-categorization coordinator publish to it.
//! `notepipe-server` subscribes a receiver per WebSocket client — the
//! transport itself lives outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Lifecycle stage a `StatusEvent` reports (spec.md §6 wire shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// A single published event (spec.md §3: `StatusEvent`, §6 wire shape).
/// `import_id`/`note_id` are optional because the earliest events in an
/// import's life (before a note id has been assigned) only have an
/// import id to report against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub import_id: Option<String>,
    pub note_id: Option<String>,
    pub status: StatusKind,
    /// What produced the event — an action name, "note_completion", etc.
    pub context: String,
    pub message: String,
    pub indent_level: Option<u32>,
    pub current_count: Option<u64>,
    pub total_count: Option<u64>,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(status: StatusKind, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            import_id: None,
            note_id: None,
            status,
            context: context.into(),
            message: message.into(),
            indent_level: None,
            current_count: None,
            total_count: None,
            metadata: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn info(note_id: impl Into<String>, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusKind::Processing, context, message).with_note_id(note_id)
    }

    pub fn error(note_id: impl Into<String>, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusKind::Failed, context, message).with_note_id(note_id)
    }

    pub fn with_note_id(mut self, note_id: impl Into<String>) -> Self {
        self.note_id = Some(note_id.into());
        self
    }

    pub fn with_import_id(mut self, import_id: impl Into<String>) -> Self {
        self.import_id = Some(import_id.into());
        self
    }

    pub fn with_counts(mut self, current: u64, total: u64) -> Self {
        self.current_count = Some(current);
        self.total_count = Some(total);
        self
    }

    pub fn with_indent_level(mut self, level: u32) -> Self {
        self.indent_level = Some(level);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Publish side of the status fan-out. Implementors must not block the
/// publisher on slow subscribers (spec.md §4.7: a lagging client drops
/// events rather than stalling a worker).
#[async_trait]
pub trait StatusBroadcaster: Send + Sync {
    fn publish(&self, event: StatusEvent);

    fn subscribe(&self) -> broadcast::Receiver<StatusEvent>;
}

/// Default in-process implementation backed by `tokio::sync::broadcast`.
pub struct BroadcastStatusSink {
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastStatusSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(16));
        Self { sender }
    }
}

impl Default for BroadcastStatusSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl StatusBroadcaster for BroadcastStatusSink {
    fn publish(&self, event: StatusEvent) {
        // A send error just means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let sink = BroadcastStatusSink::new(16);
        let mut rx = sink.subscribe();
        sink.publish(StatusEvent::info("n1", "parse", "started"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.note_id.as_deref(), Some("n1"));
        assert_eq!(event.status, StatusKind::Processing);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let sink = BroadcastStatusSink::new(16);
        sink.publish(StatusEvent::info("n1", "parse", "started"));
    }

    #[test]
    fn builder_methods_set_optional_fields() {
        let event = StatusEvent::new(StatusKind::Pending, "import", "queued")
            .with_import_id("imp-1")
            .with_counts(2, 10)
            .with_indent_level(1);
        assert_eq!(event.import_id.as_deref(), Some("imp-1"));
        assert_eq!(event.current_count, Some(2));
        assert_eq!(event.total_count, Some(10));
        assert_eq!(event.indent_level, Some(1));
    }
}
