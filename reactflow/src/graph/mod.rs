//! Declarative stage graphs.
//!
//! This module provides:
//! - [`Element`], the type-erased value flowing between stages
//! - [`Stage`] and [`StageKind`], the closed stage vocabulary
//! - [`Graph`], an immutable ordered sequence of stages
//! - shape validation ([`Shape`], [`expect_shape`])

mod element;
mod shape;
mod stage;

pub use element::Element;
pub use shape::{expect_shape, validate_structure, Shape};
pub use stage::{
    CallbackFn, Collector, ElementsFn, ErrorFn, FutureFn, GraphFn, IterableFn, MapFn, PeekFn,
    PredicateFn, ProcessorFaces, RecoverFn, RecoverWithFn, SourceFutureFn, Stage, StageKind,
    StatefulPredicateFactory,
};

use std::fmt;
use std::sync::Arc;

/// An immutable, ordered sequence of stages.
///
/// Cloning a graph is cheap and shares the stage list. Appending produces a new
/// graph and never touches the receiver, so a graph can be built into any
/// number of independent live artifacts.
#[derive(Clone)]
pub struct Graph {
    stages: Arc<[Stage]>,
}

impl Graph {
    /// Creates a graph from a list of stages.
    ///
    /// The list is not validated here; the engine validates before building.
    #[must_use]
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages: stages.into(),
        }
    }

    /// Creates an empty graph, which behaves as an identity processor.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Returns the stages in order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the graph has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stage kinds in order.
    pub fn kinds(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages.iter().map(Stage::kind)
    }

    /// Returns true if the graph accepts elements from outside.
    #[must_use]
    pub fn has_inlet(&self) -> bool {
        self.stages.first().map_or(true, |s| s.kind().has_inlet())
    }

    /// Returns true if the graph emits elements to the outside.
    #[must_use]
    pub fn has_outlet(&self) -> bool {
        self.stages.last().map_or(true, |s| s.kind().has_outlet())
    }

    /// Returns the graph's shape.
    #[must_use]
    pub fn shape(&self) -> Shape {
        Shape::from_ends(self.has_inlet(), self.has_outlet())
    }

    /// Returns a new graph with the stage appended.
    #[must_use]
    pub fn with_stage(&self, stage: Stage) -> Self {
        let mut stages = self.stages.to_vec();
        stages.push(stage);
        Self::new(stages)
    }

    /// Returns a new graph with the other graph's stages appended.
    #[must_use]
    pub fn with_graph(&self, other: &Self) -> Self {
        let mut stages = self.stages.to_vec();
        stages.extend(other.stages.iter().cloned());
        Self::new(stages)
    }

    /// Visits every stage kind, including kinds in statically nested graphs.
    pub fn visit_kinds(&self, visitor: &mut impl FnMut(StageKind)) {
        for stage in self.stages.iter() {
            visitor(stage.kind());
            for nested in stage.nested_graphs() {
                nested.visit_kinds(visitor);
            }
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stages.iter()).finish()
    }
}
