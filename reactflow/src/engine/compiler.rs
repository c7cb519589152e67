//! Turns validated graphs into operator chains.

use super::coupled::coupled;
use super::operators::{
    self, deferred, failed, guard, guarded_future, just, ExpandFn, FlatMap, IterSource, Op,
    PublisherSource, Recover, Step, Tap, TapHook,
};
use super::sinks::{self, SinkFuture};
use crate::errors::{EngineError, GraphShapeError, StreamError, UnsupportedStageError};
use crate::graph::{expect_shape, Graph, ProcessorFaces, Shape, Stage, StageKind};
use crate::reactive::{ElementStream, Inlet, OutletPublisher, Publisher};
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::runtime::Handle;

/// The assembled form of a graph.
pub(crate) enum Assembled {
    /// The graph has an open outlet.
    Stream(ElementStream),
    /// The graph ends in a sink.
    Sink(SinkFuture),
}

/// Checks a graph against the supported stage kinds, then against a shape.
///
/// Kinds are checked first, through every statically nested graph, so an
/// unsupported stage is reported whatever build operation was attempted.
///
/// # Errors
///
/// Returns `UnsupportedStage` for the first disabled kind and `Shape` if the
/// graph is malformed or has the wrong ends.
pub(crate) fn check(
    graph: &Graph,
    expected: Shape,
    supports: impl Fn(StageKind) -> bool,
) -> Result<(), EngineError> {
    let mut unsupported = None;
    graph.visit_kinds(&mut |kind| {
        if unsupported.is_none() && !supports(kind) {
            unsupported = Some(kind);
        }
    });
    if let Some(kind) = unsupported {
        return Err(UnsupportedStageError::new(kind).into());
    }
    expect_shape(graph, expected)?;
    Ok(())
}

/// Builds operator chains for one engine.
///
/// Cloned into operators that compile sub-graphs while the stream runs.
#[derive(Clone)]
pub(crate) struct Compiler {
    disabled: Arc<BTreeSet<StageKind>>,
    buffer_size: usize,
    runtime: Handle,
}

impl Compiler {
    pub(crate) fn new(disabled: Arc<BTreeSet<StageKind>>, buffer_size: usize, runtime: Handle) -> Self {
        Self {
            disabled,
            buffer_size: buffer_size.max(1),
            runtime,
        }
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn check(&self, graph: &Graph, expected: Shape) -> Result<(), EngineError> {
        check(graph, expected, |kind| !self.disabled.contains(&kind))
    }

    /// Checks and assembles a publisher-shaped graph produced at runtime.
    pub(crate) fn runtime_publisher(&self, graph: &Graph) -> Result<ElementStream, StreamError> {
        self.check(graph, Shape::Publisher)?;
        Ok(self.publisher(graph))
    }

    /// Assembles a graph already checked to be publisher-shaped.
    pub(crate) fn publisher(&self, graph: &Graph) -> ElementStream {
        match self.assemble(graph.stages(), None) {
            Assembled::Stream(stream) => stream,
            Assembled::Sink(_) => failed(misassembled(Shape::Publisher)),
        }
    }

    /// Assembles a graph already checked to be processor-shaped.
    pub(crate) fn processor(&self, graph: &Graph, upstream: ElementStream) -> ElementStream {
        match self.assemble(graph.stages(), Some(upstream)) {
            Assembled::Stream(stream) => stream,
            Assembled::Sink(_) => failed(misassembled(Shape::Processor)),
        }
    }

    /// Assembles a graph already checked to be subscriber-shaped.
    pub(crate) fn subscriber(&self, graph: &Graph, upstream: ElementStream) -> SinkFuture {
        match self.assemble(graph.stages(), Some(upstream)) {
            Assembled::Sink(sink) => sink,
            Assembled::Stream(_) => futures::future::ready(Err(misassembled(Shape::Subscriber))).boxed(),
        }
    }

    /// Assembles a graph already checked to be completion-shaped.
    pub(crate) fn completion(&self, graph: &Graph) -> SinkFuture {
        match self.assemble(graph.stages(), None) {
            Assembled::Sink(sink) => sink,
            Assembled::Stream(_) => futures::future::ready(Err(misassembled(Shape::Completion))).boxed(),
        }
    }

    fn assemble(&self, stages: &[Stage], upstream: Option<ElementStream>) -> Assembled {
        let (mut stream, rest) = match (upstream, stages.split_first()) {
            (Some(upstream), _) => (upstream, stages),
            (None, Some((first, rest))) => (self.source(first), rest),
            (None, None) => (stream::empty().boxed(), stages),
        };

        let (body, sink) = match rest.split_last() {
            Some((last, body)) if !last.kind().has_outlet() => (body, Some(last)),
            _ => (rest, None),
        };

        for stage in body {
            stream = self.operator(stream, stage);
        }

        match sink {
            Some(stage) => Assembled::Sink(self.sink(stream, stage)),
            None => Assembled::Stream(stream),
        }
    }

    fn source(&self, stage: &Stage) -> ElementStream {
        match stage {
            Stage::Of(factory) => IterSource::new(factory.clone()),
            Stage::FromPublisher(publisher) => PublisherSource::new(publisher.clone(), self.buffer_size),
            Stage::Failed(error) => failed(error.clone()),
            Stage::Concat(first, second) => self.publisher(first).chain(self.publisher(second)).boxed(),
            Stage::FromFuture { future, nullable } => operators::future_source(future.clone(), *nullable),
            other => self.operator(stream::empty().boxed(), other),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn operator(&self, upstream: ElementStream, stage: &Stage) -> ElementStream {
        let kind = stage.kind();
        match stage {
            Stage::Map(f) => {
                let f = f.clone();
                Op::new(upstream, move |element| Step::Emit(guard(kind, || f(element))))
            }
            Stage::Filter(predicate) => {
                let predicate = predicate.clone();
                Op::new(upstream, move |element| match guard(kind, || predicate(&element)) {
                    Ok(true) => Step::Emit(Ok(element)),
                    Ok(false) => Step::Skip,
                    Err(error) => Step::Emit(Err(error)),
                })
            }
            Stage::Peek(f) => {
                let f = f.clone();
                Op::new(upstream, move |element| match guard(kind, || f(&element)) {
                    Ok(()) => Step::Emit(Ok(element)),
                    Err(error) => Step::Emit(Err(error)),
                })
            }
            Stage::TakeWhile(predicate) => {
                let predicate = predicate.clone();
                Op::new(upstream, move |element| match guard(kind, || predicate(&element)) {
                    Ok(true) => Step::Emit(Ok(element)),
                    Ok(false) => Step::Complete,
                    Err(error) => Step::Emit(Err(error)),
                })
            }
            Stage::DropWhile(predicate) => {
                let predicate = predicate.clone();
                let mut dropping = true;
                Op::new(upstream, move |element| {
                    if !dropping {
                        return Step::Emit(Ok(element));
                    }
                    match guard(kind, || predicate(&element)) {
                        Ok(true) => Step::Skip,
                        Ok(false) => {
                            dropping = false;
                            Step::Emit(Ok(element))
                        }
                        Err(error) => Step::Emit(Err(error)),
                    }
                })
            }
            Stage::Skip(n) => {
                let mut remaining = *n;
                Op::new(upstream, move |element| {
                    if remaining > 0 {
                        remaining -= 1;
                        Step::Skip
                    } else {
                        Step::Emit(Ok(element))
                    }
                })
            }
            Stage::Limit(0) => Op::finished(upstream),
            Stage::Limit(n) => {
                let mut remaining = *n;
                Op::new(upstream, move |element| {
                    remaining -= 1;
                    if remaining == 0 {
                        Step::Last(element)
                    } else {
                        Step::Emit(Ok(element))
                    }
                })
            }
            Stage::Distinct(factory) => match guard(kind, || Ok(factory())) {
                Ok(mut accept) => Op::new(upstream, move |element| {
                    match guard(kind, || accept(&element)) {
                        Ok(true) => Step::Emit(Ok(element)),
                        Ok(false) => Step::Skip,
                        Err(error) => Step::Emit(Err(error)),
                    }
                }),
                Err(error) => failed(error),
            },
            Stage::FlatMap(f) => {
                let f = f.clone();
                let compiler = self.clone();
                let expand: ExpandFn = Box::new(move |element| {
                    let graph = guard(kind, || f(element))?;
                    compiler.runtime_publisher(&graph)
                });
                FlatMap::new(upstream, expand)
            }
            Stage::FlatMapFuture(f) => {
                let f = f.clone();
                let expand: ExpandFn = Box::new(move |element| {
                    let fut = guard(kind, || Ok(f(element)))?;
                    Ok(guarded_future(kind, fut).into_stream().boxed())
                });
                FlatMap::new(upstream, expand)
            }
            Stage::FlatMapIterable(f) => {
                let f = f.clone();
                let expand: ExpandFn = Box::new(move |element| {
                    let items = guard(kind, || f(element))?;
                    Ok(stream::iter(items.into_iter().map(Ok)).boxed())
                });
                FlatMap::new(upstream, expand)
            }
            Stage::OnError(f) => Tap::new(upstream, TapHook::Error(f.clone())),
            Stage::OnComplete(f) => Tap::new(upstream, TapHook::Complete(f.clone())),
            Stage::OnTerminate(f) => Tap::new(upstream, TapHook::Terminate(f.clone())),
            Stage::OnErrorResume(f) => {
                let f = f.clone();
                Recover::new(
                    upstream,
                    Box::new(move |error| guard(kind, || f(error)).map(just)),
                )
            }
            Stage::OnErrorResumeWith(f) => {
                let f = f.clone();
                let compiler = self.clone();
                Recover::new(
                    upstream,
                    Box::new(move |error| {
                        let graph = guard(kind, || f(error))?;
                        compiler.runtime_publisher(&graph)
                    }),
                )
            }
            Stage::Processor(faces) => self.splice(upstream, faces.clone()),
            Stage::Coupled {
                subscriber,
                publisher,
            } => coupled(self, upstream, subscriber.clone(), publisher),
            Stage::Of(_)
            | Stage::FromPublisher(_)
            | Stage::Failed(_)
            | Stage::Concat(..)
            | Stage::FromFuture { .. }
            | Stage::ToSubscriber(_)
            | Stage::Collect(_)
            | Stage::FindFirst
            | Stage::Cancel => failed(misplaced(kind)),
        }
    }

    /// Routes the stream through an external processor once first polled.
    fn splice(&self, upstream: ElementStream, faces: ProcessorFaces) -> ElementStream {
        let runtime = self.runtime.clone();
        let buffer_size = self.buffer_size;
        deferred(StageKind::Processor, move || {
            let (inlet, stream) = Inlet::new(buffer_size);
            faces.publisher.subscribe(inlet);
            OutletPublisher::new(upstream, runtime).subscribe(faces.subscriber);
            stream.boxed()
        })
    }

    fn sink(&self, stream: ElementStream, stage: &Stage) -> SinkFuture {
        match stage {
            Stage::ToSubscriber(subscriber) => sinks::to_subscriber(stream, subscriber.clone()),
            Stage::Collect(collector) => sinks::collect(stream, collector.clone()),
            Stage::FindFirst => sinks::find_first(stream),
            Stage::Cancel => sinks::cancel(stream),
            other => {
                let kind = other.kind();
                futures::future::ready(Err(misplaced(kind))).boxed()
            }
        }
    }
}

fn misplaced(kind: StageKind) -> StreamError {
    shape_error(GraphShapeError::new(
        "GRAPH-SHAPE-MISPLACED-STAGE",
        format!("Stage '{kind}' cannot be used in this position"),
    ))
}

fn misassembled(expected: Shape) -> StreamError {
    shape_error(GraphShapeError::new(
        "GRAPH-SHAPE-MISMATCH",
        format!("Graph does not assemble into a {expected}"),
    ))
}

fn shape_error(error: GraphShapeError) -> StreamError {
    StreamError::Engine(EngineError::Shape(error))
}
