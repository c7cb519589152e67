//! Builder for processor-shaped graphs.

use super::ops::{Convert, StreamOps};
use super::SubscriberBuilder;
use crate::engine::{Engine, ProcessorHandle};
use crate::errors::EngineError;
use crate::graph::Graph;
use crate::reactive::TypedProcessor;
use std::fmt;
use std::marker::PhantomData;

/// A graph with an inlet receiving `T` and an outlet emitting `R`.
pub struct ProcessorBuilder<T, R> {
    graph: Graph,
    _marker: PhantomData<fn(T) -> R>,
}

impl<T, R> ProcessorBuilder<T, R> {
    pub(crate) fn from_graph(graph: Graph) -> Self {
        Self {
            graph,
            _marker: PhantomData,
        }
    }

    /// Returns the underlying graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Consumes the builder, returning the underlying graph.
    #[must_use]
    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

impl<T: Send + 'static, R: Send + 'static> ProcessorBuilder<T, R> {
    /// Builds a live processor.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the graph.
    pub fn build(&self, engine: &dyn Engine) -> Result<TypedProcessor<T, R>, EngineError> {
        engine.build_processor(&self.graph).map(ProcessorHandle::typed)
    }

    /// Builds a live processor, keeping access to its lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the graph.
    pub fn build_handle(&self, engine: &dyn Engine) -> Result<ProcessorHandle, EngineError> {
        engine.build_processor(&self.graph)
    }
}

impl<T, R: Send + 'static> StreamOps<R> for ProcessorBuilder<T, R> {
    type Open<S: Send + 'static> = ProcessorBuilder<T, S>;
    type Closed<X: Send + 'static> = SubscriberBuilder<T, X>;

    fn append<S: Send + 'static>(self, stages: &Graph) -> ProcessorBuilder<T, S> {
        ProcessorBuilder::from_graph(self.graph.with_graph(stages))
    }

    fn close<X: Send + 'static>(self, stages: &Graph, convert: Convert<X>) -> SubscriberBuilder<T, X> {
        SubscriberBuilder::from_graph(self.graph.with_graph(stages), convert)
    }
}

impl<T, R> Clone for ProcessorBuilder<T, R> {
    fn clone(&self) -> Self {
        Self::from_graph(self.graph.clone())
    }
}

impl<T, R> fmt::Debug for ProcessorBuilder<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProcessorBuilder").field(&self.graph).finish()
    }
}
