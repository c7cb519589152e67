//! Span attributes and timing for built artifacts.

use crate::errors::StreamError;
use crate::graph::{Graph, Shape, StageKind};
use crate::reactive::Outcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

/// Span attributes for one built artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSpanAttributes {
    /// Identifies the artifact.
    pub artifact_id: Uuid,
    /// The artifact's shape.
    pub shape: Shape,
    /// Top-level stage kinds, in order.
    pub stages: Vec<StageKind>,
    /// Terminal status.
    pub status: Option<String>,
    /// Time from start to termination, in milliseconds.
    pub duration_ms: Option<f64>,
    /// Terminal error, if any.
    pub error: Option<String>,
}

impl ArtifactSpanAttributes {
    /// Describes an artifact built from `graph`.
    #[must_use]
    pub fn new(artifact_id: Uuid, shape: Shape, graph: &Graph) -> Self {
        Self {
            artifact_id,
            shape,
            stages: graph.kinds().collect(),
            status: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Records how the artifact ended.
    #[must_use]
    pub fn with_outcome(mut self, outcome: &Outcome) -> Self {
        self.status = Some(outcome.lifecycle_state().as_str().to_string());
        if let Outcome::Failed(error) = outcome {
            self.error = Some(error.to_string());
        }
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Converts to flat span attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("artifact.id".to_string(), self.artifact_id.to_string());
        attrs.insert("artifact.shape".to_string(), self.shape.to_string());
        let stages: Vec<&str> = self.stages.iter().map(|k| k.as_str()).collect();
        attrs.insert("artifact.stages".to_string(), stages.join(","));
        if let Some(ref v) = self.status {
            attrs.insert("artifact.status".to_string(), v.clone());
        }
        if let Some(v) = self.duration_ms {
            attrs.insert("artifact.duration_ms".to_string(), v.to_string());
        }
        if let Some(ref v) = self.error {
            attrs.insert("artifact.error".to_string(), v.clone());
        }
        attrs
    }
}

/// Span attributes for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpanAttributes {
    /// Stage kind.
    pub stage_kind: StageKind,
    /// Position in the top-level graph, when known.
    pub stage_index: Option<usize>,
    /// Stage status.
    pub status: Option<String>,
    /// Error message if failed.
    pub error: Option<String>,
}

impl StageSpanAttributes {
    /// Creates attributes for a stage of `kind`.
    #[must_use]
    pub fn new(stage_kind: StageKind) -> Self {
        Self {
            stage_kind,
            stage_index: None,
            status: None,
            error: None,
        }
    }

    /// Describes the stage a failure originated from, if it names one.
    #[must_use]
    pub fn from_error(error: &StreamError) -> Option<Self> {
        let stage = match error {
            StreamError::Stage { stage, .. } | StreamError::Panicked { stage, .. } => *stage,
            _ => return None,
        };
        Some(
            Self::new(stage)
                .with_status("failed")
                .with_error(error.to_string()),
        )
    }

    /// Sets the stage index.
    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.stage_index = Some(index);
        self
    }

    /// Sets the stage status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the error.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Converts to flat span attributes.
    #[must_use]
    pub fn to_otel_attributes(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        attrs.insert("stage.kind".to_string(), self.stage_kind.to_string());
        if let Some(v) = self.stage_index {
            attrs.insert("stage.index".to_string(), v.to_string());
        }
        if let Some(ref v) = self.status {
            attrs.insert("stage.status".to_string(), v.clone());
        }
        if let Some(ref v) = self.error {
            attrs.insert("stage.error".to_string(), v.clone());
        }
        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug, Clone, Copy)]
pub struct SpanTimer {
    start: Instant,
}

impl SpanTimer {
    /// Starts a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Stage;

    #[test]
    fn test_artifact_span_attributes() {
        let graph = Graph::new(vec![Stage::Skip(1), Stage::Cancel]);
        let id = Uuid::new_v4();
        let attrs = ArtifactSpanAttributes::new(id, Shape::Subscriber, &graph)
            .with_outcome(&Outcome::Failed(StreamError::Cancelled))
            .with_duration_ms(12.5);

        let otel = attrs.to_otel_attributes();
        assert_eq!(otel.get("artifact.shape"), Some(&"subscriber".to_string()));
        assert_eq!(otel.get("artifact.stages"), Some(&"skip,cancel".to_string()));
        assert_eq!(otel.get("artifact.status"), Some(&"errored".to_string()));
        assert_eq!(otel.get("artifact.error"), Some(&"Stream cancelled".to_string()));
        assert_eq!(otel.get("artifact.duration_ms"), Some(&"12.5".to_string()));
    }

    #[test]
    fn test_stage_span_attributes_flatten() {
        let otel = StageSpanAttributes::new(StageKind::FindFirst)
            .with_index(1)
            .to_otel_attributes();
        assert_eq!(otel.get("stage.kind"), Some(&"find_first".to_string()));
        assert_eq!(otel.get("stage.index"), Some(&"1".to_string()));
        assert!(otel.get("stage.error").is_none());
    }

    #[test]
    fn test_stage_span_attributes_from_error() {
        let error = StreamError::stage(StageKind::Map, anyhow::anyhow!("bad input"));
        let attrs = StageSpanAttributes::from_error(&error).unwrap();
        assert_eq!(attrs.stage_kind, StageKind::Map);
        let otel = attrs.to_otel_attributes();
        assert_eq!(otel.get("stage.status"), Some(&"failed".to_string()));
        assert!(otel["stage.error"].contains("bad input"));

        assert!(StageSpanAttributes::from_error(&StreamError::MissingValue).is_none());
    }

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5.0);
    }
}
