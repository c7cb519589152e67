//! Stage descriptors.
//!
//! A [`Stage`] is a declarative description of one step in a graph. It holds
//! the user functions and nested graphs the step needs, but no runtime state:
//! anything stateful (the set behind `distinct`, a `skip` counter) is created
//! fresh by the engine each time the graph is built.

use super::{Element, Graph};
use crate::errors::{StreamError, StreamResult};
use crate::reactive::{Publisher, Subscriber};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Transforms one element into another.
pub type MapFn = Arc<dyn Fn(Element) -> StreamResult<Element> + Send + Sync>;
/// Tests an element.
pub type PredicateFn = Arc<dyn Fn(&Element) -> StreamResult<bool> + Send + Sync>;
/// Observes an element without consuming it.
pub type PeekFn = Arc<dyn Fn(&Element) -> StreamResult<()> + Send + Sync>;
/// Produces a fresh iterator of elements per materialization.
pub type ElementsFn = Arc<dyn Fn() -> Box<dyn Iterator<Item = Element> + Send> + Send + Sync>;
/// Maps an element to a publisher-shaped sub-graph.
pub type GraphFn = Arc<dyn Fn(Element) -> StreamResult<Graph> + Send + Sync>;
/// Maps an element to a future of one element.
pub type FutureFn = Arc<dyn Fn(Element) -> BoxFuture<'static, StreamResult<Element>> + Send + Sync>;
/// Maps an element to zero or more elements.
pub type IterableFn = Arc<dyn Fn(Element) -> StreamResult<Vec<Element>> + Send + Sync>;
/// Produces the future behind a `from_future` source.
pub type SourceFutureFn = Arc<dyn Fn() -> BoxFuture<'static, StreamResult<Option<Element>>> + Send + Sync>;
/// Creates a stateful predicate per materialization.
pub type StatefulPredicateFactory =
    Arc<dyn Fn() -> Box<dyn FnMut(&Element) -> StreamResult<bool> + Send> + Send + Sync>;
/// Observes a terminal error.
pub type ErrorFn = Arc<dyn Fn(&StreamError) + Send + Sync>;
/// A side-effect with no arguments.
pub type CallbackFn = Arc<dyn Fn() + Send + Sync>;
/// Recovers from an error with a single element.
pub type RecoverFn = Arc<dyn Fn(StreamError) -> StreamResult<Element> + Send + Sync>;
/// Recovers from an error with a publisher-shaped sub-graph.
pub type RecoverWithFn = Arc<dyn Fn(StreamError) -> StreamResult<Graph> + Send + Sync>;

/// The fieldless discriminant of a [`Stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Emits a fixed sequence.
    Of,
    /// Emits what an external publisher emits.
    FromPublisher,
    /// Fails immediately.
    Failed,
    /// Emits one graph, then another.
    Concat,
    /// Emits the value of a future.
    FromFuture,
    /// Transforms each element.
    Map,
    /// Drops elements failing a predicate.
    Filter,
    /// Observes each element.
    Peek,
    /// Replaces each element by the output of a sub-graph.
    FlatMap,
    /// Replaces each element by the output of a future.
    FlatMapFuture,
    /// Replaces each element by zero or more elements.
    FlatMapIterable,
    /// Emits while a predicate holds, then completes.
    TakeWhile,
    /// Drops while a predicate holds, then emits everything.
    DropWhile,
    /// Drops the first n elements.
    Skip,
    /// Emits at most n elements.
    Limit,
    /// Drops repeated elements.
    Distinct,
    /// Observes a terminal error.
    OnError,
    /// Observes normal completion.
    OnComplete,
    /// Observes completion, failure or cancellation.
    OnTerminate,
    /// Replaces a terminal error by one element.
    OnErrorResume,
    /// Replaces a terminal error by the output of a sub-graph.
    OnErrorResumeWith,
    /// Routes elements through an external processor.
    Processor,
    /// Feeds a subscriber graph and emits a publisher graph, with linked termination.
    Coupled,
    /// Delivers elements to an external subscriber.
    ToSubscriber,
    /// Folds all elements into one result.
    Collect,
    /// Resolves with the first element and cancels.
    FindFirst,
    /// Cancels immediately.
    Cancel,
}

impl StageKind {
    /// Every stage kind, in declaration order.
    pub const ALL: [Self; 27] = [
        Self::Of,
        Self::FromPublisher,
        Self::Failed,
        Self::Concat,
        Self::FromFuture,
        Self::Map,
        Self::Filter,
        Self::Peek,
        Self::FlatMap,
        Self::FlatMapFuture,
        Self::FlatMapIterable,
        Self::TakeWhile,
        Self::DropWhile,
        Self::Skip,
        Self::Limit,
        Self::Distinct,
        Self::OnError,
        Self::OnComplete,
        Self::OnTerminate,
        Self::OnErrorResume,
        Self::OnErrorResumeWith,
        Self::Processor,
        Self::Coupled,
        Self::ToSubscriber,
        Self::Collect,
        Self::FindFirst,
        Self::Cancel,
    ];

    /// Returns the snake_case name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Of => "of",
            Self::FromPublisher => "from_publisher",
            Self::Failed => "failed",
            Self::Concat => "concat",
            Self::FromFuture => "from_future",
            Self::Map => "map",
            Self::Filter => "filter",
            Self::Peek => "peek",
            Self::FlatMap => "flat_map",
            Self::FlatMapFuture => "flat_map_future",
            Self::FlatMapIterable => "flat_map_iterable",
            Self::TakeWhile => "take_while",
            Self::DropWhile => "drop_while",
            Self::Skip => "skip",
            Self::Limit => "limit",
            Self::Distinct => "distinct",
            Self::OnError => "on_error",
            Self::OnComplete => "on_complete",
            Self::OnTerminate => "on_terminate",
            Self::OnErrorResume => "on_error_resume",
            Self::OnErrorResumeWith => "on_error_resume_with",
            Self::Processor => "processor",
            Self::Coupled => "coupled",
            Self::ToSubscriber => "to_subscriber",
            Self::Collect => "collect",
            Self::FindFirst => "find_first",
            Self::Cancel => "cancel",
        }
    }

    /// Returns true if stages of this kind consume elements from upstream.
    #[must_use]
    pub const fn has_inlet(self) -> bool {
        !matches!(
            self,
            Self::Of | Self::FromPublisher | Self::Failed | Self::Concat | Self::FromFuture
        )
    }

    /// Returns true if stages of this kind emit elements downstream.
    #[must_use]
    pub const fn has_outlet(self) -> bool {
        !matches!(
            self,
            Self::ToSubscriber | Self::Collect | Self::FindFirst | Self::Cancel
        )
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Folding functions behind a `collect` sink.
#[derive(Clone)]
pub struct Collector {
    /// Creates the initial accumulator.
    pub init: Arc<dyn Fn() -> Element + Send + Sync>,
    /// Folds one element into the accumulator.
    pub accumulate: Arc<dyn Fn(Element, Element) -> StreamResult<Element> + Send + Sync>,
    /// Turns the final accumulator into the result.
    pub finish: Arc<dyn Fn(Element) -> StreamResult<Element> + Send + Sync>,
}

/// An external processor split into its two faces.
#[derive(Clone)]
pub struct ProcessorFaces {
    /// The face receiving upstream elements.
    pub subscriber: Arc<dyn Subscriber<Element>>,
    /// The face emitting downstream elements.
    pub publisher: Arc<dyn Publisher<Element>>,
}

/// One step of a graph.
#[derive(Clone)]
pub enum Stage {
    /// Emits the elements of a fresh iterator.
    Of(ElementsFn),
    /// Emits what the publisher emits.
    FromPublisher(Arc<dyn Publisher<Element>>),
    /// Fails immediately with the error.
    Failed(StreamError),
    /// Emits the first graph, then the second.
    Concat(Graph, Graph),
    /// Emits the value of the future; `None` is an error unless `nullable`.
    FromFuture {
        /// Produces the future.
        future: SourceFutureFn,
        /// Whether `None` means an empty stream instead of an error.
        nullable: bool,
    },
    /// Transforms each element.
    Map(MapFn),
    /// Keeps elements matching the predicate.
    Filter(PredicateFn),
    /// Observes each element.
    Peek(PeekFn),
    /// Emits the sub-graph of each element, one sub-graph at a time.
    FlatMap(GraphFn),
    /// Emits the value of each element's future, one future at a time.
    FlatMapFuture(FutureFn),
    /// Emits the elements returned for each element.
    FlatMapIterable(IterableFn),
    /// Emits while the predicate holds.
    TakeWhile(PredicateFn),
    /// Drops while the predicate holds.
    DropWhile(PredicateFn),
    /// Drops the first n elements.
    Skip(u64),
    /// Emits at most n elements.
    Limit(u64),
    /// Keeps elements accepted by a fresh stateful predicate.
    Distinct(StatefulPredicateFactory),
    /// Observes a terminal error.
    OnError(ErrorFn),
    /// Observes normal completion.
    OnComplete(CallbackFn),
    /// Observes completion, failure or cancellation.
    OnTerminate(CallbackFn),
    /// Replaces a terminal error by one element.
    OnErrorResume(RecoverFn),
    /// Replaces a terminal error by a sub-graph.
    OnErrorResumeWith(RecoverWithFn),
    /// Routes elements through an external processor.
    Processor(ProcessorFaces),
    /// Feeds the subscriber graph and emits the publisher graph.
    Coupled {
        /// Subscriber-shaped graph receiving upstream elements.
        subscriber: Graph,
        /// Publisher-shaped graph producing downstream elements.
        publisher: Graph,
    },
    /// Delivers elements to an external subscriber.
    ToSubscriber(Arc<dyn Subscriber<Element>>),
    /// Folds all elements.
    Collect(Collector),
    /// Resolves with the first element, if any.
    FindFirst,
    /// Cancels upstream immediately.
    Cancel,
}

impl Stage {
    /// Returns the kind of this stage.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        match self {
            Self::Of(_) => StageKind::Of,
            Self::FromPublisher(_) => StageKind::FromPublisher,
            Self::Failed(_) => StageKind::Failed,
            Self::Concat(..) => StageKind::Concat,
            Self::FromFuture { .. } => StageKind::FromFuture,
            Self::Map(_) => StageKind::Map,
            Self::Filter(_) => StageKind::Filter,
            Self::Peek(_) => StageKind::Peek,
            Self::FlatMap(_) => StageKind::FlatMap,
            Self::FlatMapFuture(_) => StageKind::FlatMapFuture,
            Self::FlatMapIterable(_) => StageKind::FlatMapIterable,
            Self::TakeWhile(_) => StageKind::TakeWhile,
            Self::DropWhile(_) => StageKind::DropWhile,
            Self::Skip(_) => StageKind::Skip,
            Self::Limit(_) => StageKind::Limit,
            Self::Distinct(_) => StageKind::Distinct,
            Self::OnError(_) => StageKind::OnError,
            Self::OnComplete(_) => StageKind::OnComplete,
            Self::OnTerminate(_) => StageKind::OnTerminate,
            Self::OnErrorResume(_) => StageKind::OnErrorResume,
            Self::OnErrorResumeWith(_) => StageKind::OnErrorResumeWith,
            Self::Processor(_) => StageKind::Processor,
            Self::Coupled { .. } => StageKind::Coupled,
            Self::ToSubscriber(_) => StageKind::ToSubscriber,
            Self::Collect(_) => StageKind::Collect,
            Self::FindFirst => StageKind::FindFirst,
            Self::Cancel => StageKind::Cancel,
        }
    }

    /// Returns the graphs nested statically inside this stage.
    ///
    /// Graphs produced at runtime (by `flat_map` or `on_error_resume_with`) are
    /// not included.
    #[must_use]
    pub fn nested_graphs(&self) -> Vec<&Graph> {
        match self {
            Self::Concat(first, second) => vec![first, second],
            Self::Coupled {
                subscriber,
                publisher,
            } => vec![subscriber, publisher],
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip(n) | Self::Limit(n) => write!(f, "{}({n})", self.kind()),
            Self::Failed(err) => write!(f, "failed({err})"),
            Self::Concat(first, second) => write!(f, "concat({first:?}, {second:?})"),
            Self::Coupled {
                subscriber,
                publisher,
            } => write!(f, "coupled({subscriber:?}, {publisher:?})"),
            _ => f.write_str(self.kind().as_str()),
        }
    }
}
