//! Builders for graphs with a closed sink.

use super::ops::Convert;
use crate::engine::{CompletionHandle, Engine};
use crate::errors::EngineError;
use crate::graph::Graph;
use crate::reactive::Subscriber;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A graph with an inlet receiving `T` whose sink resolves with `X`.
pub struct SubscriberBuilder<T, X> {
    graph: Graph,
    convert: Convert<X>,
    _marker: PhantomData<fn(T)>,
}

impl<T, X> SubscriberBuilder<T, X> {
    pub(crate) fn from_graph(graph: Graph, convert: Convert<X>) -> Self {
        Self {
            graph,
            convert,
            _marker: PhantomData,
        }
    }

    pub(crate) fn convert(&self) -> Convert<X> {
        self.convert
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

impl<T: Send + 'static, X: Send + 'static> SubscriberBuilder<T, X> {
    /// Builds a live subscriber and the handle to its result. The graph is
    /// running once this returns and waits for a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the graph.
    pub fn build(&self, engine: &dyn Engine) -> Result<(Arc<dyn Subscriber<T>>, CompletionHandle<X>), EngineError> {
        let (subscriber, completion) = engine.build_subscriber(&self.graph)?.into_typed::<T>();
        Ok((subscriber, completion.map(self.convert)))
    }
}

impl<T, X> Clone for SubscriberBuilder<T, X> {
    fn clone(&self) -> Self {
        Self::from_graph(self.graph.clone(), self.convert)
    }
}

impl<T, X> fmt::Debug for SubscriberBuilder<T, X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriberBuilder").field(&self.graph).finish()
    }
}

/// A closed graph resolving with `X`.
pub struct CompletionRunner<X> {
    graph: Graph,
    convert: Convert<X>,
}

impl<X> CompletionRunner<X> {
    pub(crate) fn from_graph(graph: Graph, convert: Convert<X>) -> Self {
        Self { graph, convert }
    }

    /// Returns the underlying graph.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Consumes the runner, returning the underlying graph.
    #[must_use]
    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

impl<X: Send + 'static> CompletionRunner<X> {
    /// Starts the graph and returns the handle to its result.
    ///
    /// Each call runs an independent copy of the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the graph.
    pub fn run(&self, engine: &dyn Engine) -> Result<CompletionHandle<X>, EngineError> {
        Ok(engine.build_completion(&self.graph)?.map(self.convert))
    }
}

impl<X> Clone for CompletionRunner<X> {
    fn clone(&self) -> Self {
        Self::from_graph(self.graph.clone(), self.convert)
    }
}

impl<X> fmt::Debug for CompletionRunner<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompletionRunner").field(&self.graph).finish()
    }
}
