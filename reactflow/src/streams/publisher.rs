//! Builder for publisher-shaped graphs.

use super::ops::{Convert, StreamOps};
use super::CompletionRunner;
use crate::engine::{Engine, PublisherHandle};
use crate::errors::EngineError;
use crate::graph::Graph;
use crate::reactive::TypedPublisher;
use std::fmt;
use std::marker::PhantomData;

/// A graph with a closed source and an outlet emitting `T`.
pub struct PublisherBuilder<T> {
    graph: Graph,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PublisherBuilder<T> {
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

impl<T: Send + 'static> PublisherBuilder<T> {
    /// Builds a live publisher.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the graph.
    pub fn build(&self, engine: &dyn Engine) -> Result<TypedPublisher<T>, EngineError> {
        engine.build_publisher(&self.graph).map(PublisherHandle::typed)
    }

    /// Builds a live publisher, keeping access to its lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the graph.
    pub fn build_handle(&self, engine: &dyn Engine) -> Result<PublisherHandle, EngineError> {
        engine.build_publisher(&self.graph)
    }
}

impl<T: Send + 'static> StreamOps<T> for PublisherBuilder<T> {
    type Open<R: Send + 'static> = PublisherBuilder<R>;
    type Closed<X: Send + 'static> = CompletionRunner<X>;

    fn append<R: Send + 'static>(self, stages: &Graph) -> PublisherBuilder<R> {
        PublisherBuilder::from_graph(self.graph.with_graph(stages))
    }

    fn close<X: Send + 'static>(self, stages: &Graph, convert: Convert<X>) -> CompletionRunner<X> {
        CompletionRunner::from_graph(self.graph.with_graph(stages), convert)
    }
}

impl<T> Clone for PublisherBuilder<T> {
    fn clone(&self) -> Self {
        Self::from_graph(self.graph.clone())
    }
}

impl<T> fmt::Debug for PublisherBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublisherBuilder").field(&self.graph).finish()
    }
}
