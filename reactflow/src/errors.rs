//! Error types for the reactflow engine.
//!
//! Three families exist and never mix:
//!
//! - [`EngineError`]: structural problems found while building a graph
//!   (unsupported stage kinds, wrong open/closed shape). Returned synchronously
//!   from the `build_*` operations before any element flows.
//! - [`StreamError`]: failures that happen while elements flow. These are only
//!   ever delivered as the terminal `on_error` signal or as the failure of a
//!   completion handle.
//! - [`AckError`]: failures of an acknowledgement action, surfaced only through
//!   the future returned by `ack()`.

use crate::graph::StageKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised synchronously while building a live artifact from a graph.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The graph contains a stage kind this engine does not implement.
    #[error("{0}")]
    UnsupportedStage(#[from] UnsupportedStageError),

    /// The graph's shape does not match the requested build operation.
    #[error("{0}")]
    Shape(#[from] GraphShapeError),

    /// No tokio runtime is available to drive the pipeline.
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),
}

impl EngineError {
    /// Returns the contract error info attached to this error, if any.
    #[must_use]
    pub fn error_info(&self) -> Option<&ContractErrorInfo> {
        match self {
            Self::UnsupportedStage(err) => Some(&err.error_info),
            Self::Shape(err) => Some(&err.error_info),
            Self::NoRuntime(_) => None,
        }
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "GRAPH-SHAPE-NO-SOURCE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Error raised when a graph uses a stage kind the engine cannot run.
#[derive(Debug, Clone, Error)]
#[error("Unsupported stage: {kind}")]
pub struct UnsupportedStageError {
    /// The unrecognized stage kind.
    pub kind: StageKind,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl UnsupportedStageError {
    /// Creates a new unsupported stage error.
    #[must_use]
    pub fn new(kind: StageKind) -> Self {
        let info = ContractErrorInfo::new(
            "ENGINE-UNSUPPORTED-STAGE",
            format!("This engine does not implement the '{kind}' stage"),
        )
        .with_fix_hint("Use an engine that advertises this stage kind, or remove it from the graph.")
        .with_context_entry("kind", kind.as_str());

        Self {
            kind,
            error_info: info,
        }
    }
}

/// Error raised when a graph's open/closed ends do not fit the build operation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphShapeError {
    /// The error message.
    pub message: String,
    /// Index of the offending stage, when one stage is to blame.
    pub stage_index: Option<usize>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl GraphShapeError {
    /// Creates a new shape error with the given code.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            error_info: ContractErrorInfo::new(code, message.clone()),
            message,
            stage_index: None,
        }
    }

    /// Points the error at a stage.
    #[must_use]
    pub fn at_stage(mut self, index: usize) -> Self {
        self.stage_index = Some(index);
        self.error_info = self
            .error_info
            .with_context_entry("stage_index", index.to_string());
        self
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.error_info = self.error_info.with_fix_hint(hint);
        self
    }
}

/// Errors delivered as a stream's terminal signal.
///
/// Cloneable so a single failure can be reported to a subscriber and to a
/// completion handle, and so `Failed` sources can be materialized repeatedly.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// A user-supplied stage function returned an error.
    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        /// The stage kind that failed.
        stage: StageKind,
        /// The underlying failure.
        #[source]
        source: SharedError,
    },

    /// A user-supplied stage function panicked.
    #[error("Stage '{stage}' panicked: {message}")]
    Panicked {
        /// The stage kind that panicked.
        stage: StageKind,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// A source or upstream publisher signalled a failure.
    #[error("Upstream failure: {0}")]
    Upstream(SharedError),

    /// An element did not have the type a typed stage expected.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// The expected type name.
        expected: &'static str,
        /// The type name carried by the element.
        found: &'static str,
    },

    /// A reactive-streams protocol rule was violated.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The publisher already has a subscriber.
    #[error("Publisher already has a subscriber")]
    AlreadySubscribed,

    /// A non-nullable future resolved without a value.
    #[error("Future completed without a value")]
    MissingValue,

    /// The stream was cancelled before it produced a result.
    #[error("Stream cancelled")]
    Cancelled,

    /// A sub-graph built at runtime could not be compiled.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

impl StreamError {
    /// Wraps a user error raised by the given stage.
    #[must_use]
    pub fn stage(stage: StageKind, error: impl Into<anyhow::Error>) -> Self {
        Self::Stage {
            stage,
            source: SharedError::new(error),
        }
    }

    /// Wraps an upstream failure.
    #[must_use]
    pub fn upstream(error: impl Into<anyhow::Error>) -> Self {
        Self::Upstream(SharedError::new(error))
    }

    /// Creates a protocol violation error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true for cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A cheaply cloneable `anyhow::Error`.
#[derive(Debug, Clone)]
pub struct SharedError(Arc<anyhow::Error>);

impl SharedError {
    /// Wraps an error.
    #[must_use]
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(error.into()))
    }

    /// Returns the wrapped error.
    #[must_use]
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl std::fmt::Display for SharedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&*self.0, f)
    }
}

impl std::error::Error for SharedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Error returned by a failed acknowledgement.
#[derive(Debug, Clone, Error)]
#[error("Acknowledgement failed: {source}")]
pub struct AckError {
    #[source]
    source: SharedError,
}

impl AckError {
    /// Creates an ack error from any error.
    #[must_use]
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            source: SharedError::new(error),
        }
    }

    /// Creates an ack error from a message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(anyhow::anyhow!(message.into()))
    }
}

/// Result alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_stage_names_kind() {
        let err = UnsupportedStageError::new(StageKind::FlatMap);
        assert_eq!(err.to_string(), "Unsupported stage: flat_map");
        assert_eq!(err.error_info.code, "ENGINE-UNSUPPORTED-STAGE");
        assert_eq!(err.error_info.context.get("kind").map(String::as_str), Some("flat_map"));
    }

    #[test]
    fn test_shape_error_at_stage() {
        let err = GraphShapeError::new("GRAPH-SHAPE-MISPLACED-SOURCE", "source in the middle")
            .at_stage(2)
            .with_fix_hint("move it");

        assert_eq!(err.stage_index, Some(2));
        assert_eq!(err.error_info.fix_hint.as_deref(), Some("move it"));
        assert_eq!(err.error_info.context["stage_index"], "2");
    }

    #[test]
    fn test_engine_error_info() {
        let err: EngineError = UnsupportedStageError::new(StageKind::Cancel).into();
        assert_eq!(err.error_info().map(|i| i.code.as_str()), Some("ENGINE-UNSUPPORTED-STAGE"));

        let err = EngineError::NoRuntime("none".into());
        assert!(err.error_info().is_none());
    }

    #[test]
    fn test_stream_error_display() {
        let err = StreamError::stage(StageKind::Map, anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "Stage 'map' failed: boom");

        let err = StreamError::TypeMismatch {
            expected: "i32",
            found: "alloc::string::String",
        };
        assert!(err.to_string().contains("expected i32"));
    }

    #[test]
    fn test_stream_error_clone_shares_source() {
        let err = StreamError::upstream(anyhow::anyhow!("disk on fire"));
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(!cloned.is_cancelled());
        assert!(StreamError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_contract_info_to_json() {
        let info = ContractErrorInfo::new("CODE", "summary").with_fix_hint("hint");
        let json = info.to_json();
        assert_eq!(json["code"], "CODE");
        assert_eq!(json["fix_hint"], "hint");
    }

    #[test]
    fn test_ack_error_message() {
        let err = AckError::msg("commit rejected");
        assert_eq!(err.to_string(), "Acknowledgement failed: commit rejected");
    }
}
