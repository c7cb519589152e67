//! Materializes graphs into live artifacts.
//!
//! An [`Engine`] turns a [`Graph`] into one of four artifacts depending on
//! the graph's shape. Every build validates first (supported stage kinds,
//! then shape) and only then instantiates operators, so a rejected graph
//! never starts anything.

mod artifacts;
mod compiler;
mod coupled;
mod operators;
mod sinks;


pub use artifacts::{CompletionHandle, ProcessorHandle, PublisherHandle, SubscriberWithCompletion};

use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::events::EventSink;
use crate::graph::{Element, Graph, Shape, StageKind};
use crate::reactive::{Inlet, OutletPublisher};
use artifacts::{spawn_sink, Monitor};
use compiler::{check, Compiler};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Builds live artifacts from graphs.
pub trait Engine: Send + Sync {
    /// Builds a publisher from a graph with a closed source and an open sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph has another shape or uses an
    /// unsupported stage.
    fn build_publisher(&self, graph: &Graph) -> Result<PublisherHandle, EngineError>;

    /// Builds a subscriber and its completion handle from a graph with an
    /// open source and a closed sink. The graph starts running immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph has another shape or uses an
    /// unsupported stage.
    fn build_subscriber(&self, graph: &Graph) -> Result<SubscriberWithCompletion, EngineError>;

    /// Builds a processor from a graph with open ends on both sides.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph has another shape or uses an
    /// unsupported stage.
    fn build_processor(&self, graph: &Graph) -> Result<ProcessorHandle, EngineError>;

    /// Runs a closed graph and returns its eventual result.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph has another shape or uses an
    /// unsupported stage.
    fn build_completion(&self, graph: &Graph) -> Result<CompletionHandle<Element>, EngineError>;

    /// Returns whether graphs may contain stages of `kind`.
    fn supports(&self, _kind: StageKind) -> bool {
        true
    }
}

struct Settings {
    config: EngineConfig,
    disabled: Arc<BTreeSet<StageKind>>,
    events: Option<Arc<dyn EventSink>>,
    runtime: Option<Handle>,
}

/// The provided [`Engine`], running operators on tokio.
///
/// Cheap to clone; clones share settings.
#[derive(Clone)]
pub struct StreamEngine {
    settings: Arc<Settings>,
}

impl Default for StreamEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StreamEngine {
    /// Creates an engine supporting every stage kind, with the default
    /// configuration and no event sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts configuring an engine.
    #[must_use]
    pub fn builder() -> StreamEngineBuilder {
        StreamEngineBuilder::default()
    }

    /// Returns the engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.settings.config
    }

    fn prepare(&self, graph: &Graph, shape: Shape) -> Result<(Compiler, Arc<Monitor>), EngineError> {
        check(graph, shape, |kind| self.supports(kind))?;
        let runtime = match &self.settings.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| EngineError::NoRuntime(e.to_string()))?,
        };
        let compiler = Compiler::new(
            self.settings.disabled.clone(),
            self.settings.config.effective_buffer_size(),
            runtime,
        );
        let events = self
            .settings
            .events
            .clone()
            .filter(|_| self.settings.config.emit_events);
        Ok((compiler, Monitor::new(shape, graph, events)))
    }
}

impl Engine for StreamEngine {
    fn build_publisher(&self, graph: &Graph) -> Result<PublisherHandle, EngineError> {
        let (compiler, monitor) = self.prepare(graph, Shape::Publisher)?;
        let stream = compiler.publisher(graph);
        let outlet = OutletPublisher::new(stream, compiler.runtime().clone());
        Ok(PublisherHandle::new(outlet, monitor))
    }

    fn build_subscriber(&self, graph: &Graph) -> Result<SubscriberWithCompletion, EngineError> {
        let (compiler, monitor) = self.prepare(graph, Shape::Subscriber)?;
        let (inlet, upstream) = Inlet::new(compiler.buffer_size());
        let sink = compiler.subscriber(graph, upstream.boxed());
        let artifact_id = monitor.artifact_id();
        let completion = spawn_sink(compiler.runtime(), sink, monitor);
        Ok(SubscriberWithCompletion::new(inlet, completion, artifact_id))
    }

    fn build_processor(&self, graph: &Graph) -> Result<ProcessorHandle, EngineError> {
        let (compiler, monitor) = self.prepare(graph, Shape::Processor)?;
        let (inlet, upstream) = Inlet::new(compiler.buffer_size());
        let stream = compiler.processor(graph, upstream.boxed());
        let outlet = OutletPublisher::new(stream, compiler.runtime().clone());
        Ok(ProcessorHandle::new(inlet, outlet, monitor))
    }

    fn build_completion(&self, graph: &Graph) -> Result<CompletionHandle<Element>, EngineError> {
        let (compiler, monitor) = self.prepare(graph, Shape::Completion)?;
        let sink = compiler.completion(graph);
        Ok(spawn_sink(compiler.runtime(), sink, monitor))
    }

    fn supports(&self, kind: StageKind) -> bool {
        !self.settings.disabled.contains(&kind)
    }
}

impl fmt::Debug for StreamEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEngine")
            .field("config", &self.settings.config)
            .field("disabled", &self.settings.disabled)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StreamEngine`].
#[derive(Default)]
#[must_use]
pub struct StreamEngineBuilder {
    config: EngineConfig,
    disabled: BTreeSet<StageKind>,
    events: Option<Arc<dyn EventSink>>,
    runtime: Option<Handle>,
}

impl StreamEngineBuilder {
    /// Sets the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sends lifecycle events to `sink`.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Runs artifacts on `runtime` instead of the ambient one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Rejects graphs containing stages of `kind`.
    pub fn without_stage(mut self, kind: StageKind) -> Self {
        self.disabled.insert(kind);
        self
    }

    /// Rejects graphs containing stages of any of `kinds`.
    pub fn without_stages(mut self, kinds: impl IntoIterator<Item = StageKind>) -> Self {
        self.disabled.extend(kinds);
        self
    }

    /// Builds the engine.
    pub fn build(self) -> StreamEngine {
        StreamEngine {
            settings: Arc::new(Settings {
                config: self.config,
                disabled: Arc::new(self.disabled),
                events: self.events,
                runtime: self.runtime,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamError;
    use crate::events::CollectingEventSink;
    use crate::graph::Stage;
    use std::sync::Arc;

    fn of_ints(values: Vec<i32>) -> Stage {
        Stage::Of(Arc::new(move || {
            Box::new(values.clone().into_iter().map(Element::new)) as Box<dyn Iterator<Item = Element> + Send>
        }))
    }

    #[test]
    fn test_builder_disables_kinds() {
        let engine = StreamEngine::builder()
            .without_stage(StageKind::FlatMap)
            .without_stages([StageKind::Distinct])
            .build();
        assert!(!engine.supports(StageKind::FlatMap));
        assert!(!engine.supports(StageKind::Distinct));
        assert!(engine.supports(StageKind::Map));
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let engine = StreamEngine::new();
        let graph = Graph::new(vec![of_ints(vec![1]), Stage::Cancel]);
        let error = engine.build_completion(&graph).unwrap_err();
        assert!(matches!(error, EngineError::NoRuntime(_)));
    }

    #[test]
    fn test_validation_precedes_runtime_lookup() {
        let engine = StreamEngine::builder().without_stage(StageKind::Of).build();
        let graph = Graph::new(vec![of_ints(vec![1]), Stage::Cancel]);
        let error = engine.build_completion(&graph).unwrap_err();
        assert!(matches!(error, EngineError::UnsupportedStage(ref e) if e.kind == StageKind::Of));
    }

    #[tokio::test]
    async fn test_explicit_runtime() {
        let engine = StreamEngine::builder().with_runtime(Handle::current()).build();
        let graph = Graph::new(vec![Stage::Failed(StreamError::MissingValue), Stage::Cancel]);
        let result = engine.build_completion(&graph).unwrap().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_events_reach_only_the_injected_sink() {
        let sink = Arc::new(CollectingEventSink::new());
        let graph = Graph::new(vec![of_ints(vec![1]), Stage::Cancel]);

        let _ = StreamEngine::new().build_completion(&graph).unwrap().await;
        assert!(sink.is_empty());

        let engine = StreamEngine::builder().with_event_sink(sink.clone()).build();
        let _ = engine.build_completion(&graph).unwrap().await;
        let types = sink.event_types();
        assert_eq!(types.len(), 2);
        assert_eq!(types[0], "stream.subscribed");

        let other = StreamEngine::builder().with_event_sink(Arc::new(CollectingEventSink::new())).build();
        let _ = other.build_completion(&graph).unwrap().await;
        assert_eq!(sink.event_types().len(), 2);
    }
}
