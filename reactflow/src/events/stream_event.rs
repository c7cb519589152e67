//! Lifecycle events of built artifacts.

use super::EventSink;
use crate::graph::Shape;
use crate::reactive::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventKind {
    /// The artifact started running.
    Subscribed,
    /// The stream completed normally.
    Completed,
    /// The stream terminated with an error.
    Failed,
    /// The stream was cancelled.
    Cancelled,
}

impl StreamEventKind {
    /// Returns the event type string sent to sinks.
    #[must_use]
    pub const fn event_type(self) -> &'static str {
        match self {
            Self::Subscribed => "stream.subscribed",
            Self::Completed => "stream.completed",
            Self::Failed => "stream.failed",
            Self::Cancelled => "stream.cancelled",
        }
    }
}

impl fmt::Display for StreamEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

/// One lifecycle event of one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Identifies the artifact across its events.
    pub artifact_id: Uuid,
    /// What happened.
    pub kind: StreamEventKind,
    /// The artifact's shape.
    pub shape: Shape,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// The terminal error, for `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamEvent {
    /// Creates an event stamped now.
    #[must_use]
    pub fn new(artifact_id: Uuid, kind: StreamEventKind, shape: Shape) -> Self {
        Self {
            artifact_id,
            kind,
            shape,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Creates the terminal event matching `outcome`.
    #[must_use]
    pub fn terminal(artifact_id: Uuid, shape: Shape, outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Completed => Self::new(artifact_id, StreamEventKind::Completed, shape),
            Outcome::Cancelled => Self::new(artifact_id, StreamEventKind::Cancelled, shape),
            Outcome::Failed(error) => Self {
                error: Some(error.to_string()),
                ..Self::new(artifact_id, StreamEventKind::Failed, shape)
            },
        }
    }

    /// Returns the JSON payload sent to sinks.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Sends the event to `sink` without blocking.
    pub fn emit_to(&self, sink: &dyn EventSink) {
        sink.try_emit(self.kind.event_type(), Some(self.to_payload()));
    }

    /// Sends the event to `sink`, waiting for the sink to accept it.
    pub async fn send_to(&self, sink: &dyn EventSink) {
        sink.emit(self.kind.event_type(), Some(self.to_payload())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamError;
    use crate::events::CollectingEventSink;

    #[test]
    fn test_event_types() {
        assert_eq!(StreamEventKind::Subscribed.event_type(), "stream.subscribed");
        assert_eq!(StreamEventKind::Cancelled.to_string(), "stream.cancelled");
    }

    #[test]
    fn test_terminal_from_outcome() {
        let id = Uuid::new_v4();
        let event = StreamEvent::terminal(
            id,
            Shape::Completion,
            &Outcome::Failed(StreamError::MissingValue),
        );
        assert_eq!(event.kind, StreamEventKind::Failed);
        assert_eq!(event.error.as_deref(), Some("Future completed without a value"));

        let event = StreamEvent::terminal(id, Shape::Publisher, &Outcome::Completed);
        assert_eq!(event.kind, StreamEventKind::Completed);
        assert!(event.error.is_none());
    }

    #[test]
    fn test_payload_and_emit() {
        let sink = CollectingEventSink::new();
        let id = Uuid::new_v4();
        StreamEvent::new(id, StreamEventKind::Subscribed, Shape::Processor).emit_to(&sink);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "stream.subscribed");
        let payload = events[0].1.clone().unwrap();
        assert_eq!(payload["artifact_id"], id.to_string());
        assert_eq!(payload["shape"], "processor");
        assert_eq!(payload["kind"], "subscribed");
        assert!(payload.get("error").is_none());
    }
}
