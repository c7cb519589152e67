//! Structural validation of graphs.

use super::{Graph, StageKind};
use crate::errors::GraphShapeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which ends of a graph are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// Closed source, open sink.
    Publisher,
    /// Open source, closed sink.
    Subscriber,
    /// Open source, open sink.
    Processor,
    /// Closed source, closed sink.
    Completion,
}

impl Shape {
    /// Derives the shape from the graph's open ends.
    #[must_use]
    pub const fn from_ends(has_inlet: bool, has_outlet: bool) -> Self {
        match (has_inlet, has_outlet) {
            (false, true) => Self::Publisher,
            (true, false) => Self::Subscriber,
            (true, true) => Self::Processor,
            (false, false) => Self::Completion,
        }
    }

    /// Returns true if graphs of this shape accept elements from outside.
    #[must_use]
    pub const fn has_inlet(self) -> bool {
        matches!(self, Self::Subscriber | Self::Processor)
    }

    /// Returns true if graphs of this shape emit elements to the outside.
    #[must_use]
    pub const fn has_outlet(self) -> bool {
        matches!(self, Self::Publisher | Self::Processor)
    }

    /// Returns the shape's name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
            Self::Processor => "processor",
            Self::Completion => "completion",
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks that sources only appear first and sinks only appear last, in this
/// graph and in every graph nested statically inside it.
///
/// # Errors
///
/// Returns a [`GraphShapeError`] naming the first misplaced stage.
pub fn validate_structure(graph: &Graph) -> Result<(), GraphShapeError> {
    let stages = graph.stages();
    let last = stages.len().saturating_sub(1);

    for (index, stage) in stages.iter().enumerate() {
        let kind = stage.kind();
        if !kind.has_inlet() && index != 0 {
            return Err(GraphShapeError::new(
                "GRAPH-SHAPE-MISPLACED-SOURCE",
                format!("Source stage '{kind}' at position {index} has no upstream to attach to"),
            )
            .at_stage(index)
            .with_fix_hint("Source stages may only start a graph; use concat or flat_map to join sources."));
        }
        if !kind.has_outlet() && index != last {
            return Err(GraphShapeError::new(
                "GRAPH-SHAPE-MISPLACED-SINK",
                format!("Sink stage '{kind}' at position {index} is followed by more stages"),
            )
            .at_stage(index)
            .with_fix_hint("Sink stages may only end a graph."));
        }

        match stage.kind() {
            StageKind::Concat => {
                for nested in stage.nested_graphs() {
                    expect_nested(nested, Shape::Publisher, kind, index)?;
                }
            }
            StageKind::Coupled => {
                let nested = stage.nested_graphs();
                if let [subscriber, publisher] = nested.as_slice() {
                    expect_nested(subscriber, Shape::Subscriber, kind, index)?;
                    expect_nested(publisher, Shape::Publisher, kind, index)?;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Checks that the graph is well formed and has the expected shape.
///
/// # Errors
///
/// Returns a [`GraphShapeError`] describing the structural problem or the
/// mismatching ends.
pub fn expect_shape(graph: &Graph, expected: Shape) -> Result<(), GraphShapeError> {
    validate_structure(graph)?;

    let actual = graph.shape();
    if actual == expected {
        return Ok(());
    }

    let mut problems = Vec::new();
    if expected.has_inlet() != actual.has_inlet() {
        problems.push(if expected.has_inlet() {
            "it starts with a source stage but an open inlet is required"
        } else {
            "it has no source stage"
        });
    }
    if expected.has_outlet() != actual.has_outlet() {
        problems.push(if expected.has_outlet() {
            "it ends with a sink stage but an open outlet is required"
        } else {
            "it has no sink stage"
        });
    }

    Err(GraphShapeError::new(
        "GRAPH-SHAPE-MISMATCH",
        format!(
            "Expected a {expected} graph but found a {actual} graph: {}",
            problems.join(", ")
        ),
    )
    .with_fix_hint(format!("Use the build operation for {actual} graphs, or adjust the graph's ends.")))
}

fn expect_nested(
    graph: &Graph,
    expected: Shape,
    owner: StageKind,
    index: usize,
) -> Result<(), GraphShapeError> {
    expect_shape(graph, expected).map_err(|err| {
        GraphShapeError::new(
            err.error_info.code.clone(),
            format!("Nested graph of '{owner}' stage is invalid: {}", err.message),
        )
        .at_stage(index)
    })
}
