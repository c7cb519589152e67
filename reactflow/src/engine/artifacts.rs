//! Live artifacts returned by the build operations.

use super::sinks::SinkFuture;
use crate::errors::{StreamError, StreamResult};
use crate::events::{EventSink, StreamEvent, StreamEventKind};
use crate::graph::{Element, Graph, Shape};
use crate::observability::{ArtifactSpanAttributes, SpanTimer, StageSpanAttributes};
use crate::reactive::{
    InletSubscriber, LifecycleState, Outcome, OutletPublisher, Publisher, Subscriber, Subscription,
    TypedProcessor, TypedPublisher, TypedSubscriber,
};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Reports the start and end of one artifact to logs and the event sink.
pub(crate) struct Monitor {
    attributes: ArtifactSpanAttributes,
    events: Option<Arc<dyn EventSink>>,
    timer: Mutex<Option<SpanTimer>>,
    started: AtomicBool,
}

impl Monitor {
    pub(crate) fn new(shape: Shape, graph: &Graph, events: Option<Arc<dyn EventSink>>) -> Arc<Self> {
        let attributes = ArtifactSpanAttributes::new(Uuid::new_v4(), shape, graph);
        debug!(
            artifact_id = %attributes.artifact_id,
            shape = %shape,
            stages = graph.len(),
            "Artifact built"
        );
        Arc::new(Self {
            attributes,
            events,
            timer: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    pub(crate) fn artifact_id(&self) -> Uuid {
        self.attributes.artifact_id
    }

    pub(crate) fn started(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.timer.lock() = Some(SpanTimer::start());
        debug!(artifact_id = %self.artifact_id(), shape = %self.attributes.shape, "Artifact started");
        if let Some(events) = &self.events {
            StreamEvent::new(self.artifact_id(), StreamEventKind::Subscribed, self.attributes.shape)
                .emit_to(events.as_ref());
        }
    }

    /// Reports the end of the run, sending the terminal event without blocking.
    pub(crate) fn finished(&self, outcome: &Outcome) {
        if let Some((events, event)) = self.conclude(outcome) {
            event.emit_to(events.as_ref());
        }
    }

    /// Reports the end of the run from a task, awaiting the event sink.
    pub(crate) async fn finished_async(&self, outcome: &Outcome) {
        if let Some((events, event)) = self.conclude(outcome) {
            event.send_to(events.as_ref()).await;
        }
    }

    fn conclude(&self, outcome: &Outcome) -> Option<(Arc<dyn EventSink>, StreamEvent)> {
        let timer = *self.timer.lock();
        let elapsed = timer.map_or(0.0, |timer| timer.elapsed_ms());
        let attributes = self
            .attributes
            .clone()
            .with_outcome(outcome)
            .with_duration_ms(elapsed);
        match outcome {
            Outcome::Failed(error) => warn!(
                artifact_id = %attributes.artifact_id,
                error = %error,
                failed_stage = ?StageSpanAttributes::from_error(error).map(|s| s.to_otel_attributes()),
                duration_ms = elapsed,
                "Stream failed"
            ),
            Outcome::Completed | Outcome::Cancelled => debug!(
                artifact_id = %attributes.artifact_id,
                attributes = ?attributes.to_otel_attributes(),
                "Stream finished"
            ),
        }
        let events = self.events.clone()?;
        Some((events, StreamEvent::terminal(self.artifact_id(), self.attributes.shape, outcome)))
    }

    pub(crate) fn attach(self: &Arc<Self>, outlet: OutletPublisher) -> OutletPublisher {
        let on_start = self.clone();
        let on_end = self.clone();
        outlet
            .with_on_start(Arc::new(move || on_start.started()))
            .with_on_terminate(Arc::new(move |outcome| on_end.finished(outcome)))
    }
}

fn outcome_of<T>(result: &StreamResult<T>) -> Outcome {
    match result {
        Ok(_) => Outcome::Completed,
        Err(StreamError::Cancelled) => Outcome::Cancelled,
        Err(error) => Outcome::Failed(error.clone()),
    }
}

/// Runs a sink on `runtime` and returns a handle to its result.
pub(crate) fn spawn_sink(runtime: &Handle, sink: SinkFuture, monitor: Arc<Monitor>) -> CompletionHandle<Element> {
    let (tx, rx) = oneshot::channel();
    monitor.started();
    runtime.spawn(async move {
        let result = sink.await;
        monitor.finished_async(&outcome_of(&result)).await;
        if tx.send(result).is_err() {
            debug!(artifact_id = %monitor.artifact_id(), "Completion handle dropped before the result");
        }
    });
    CompletionHandle::from_receiver(rx)
}

/// The eventual result of a running graph.
///
/// Resolves with the sink's result: the folded value for `collect`,
/// `Option<Element>` for `find_first`, a unit element for `cancel` and
/// `to_subscriber`. Dropping the handle does not stop the graph.
#[must_use = "a completion handle does nothing unless awaited"]
pub struct CompletionHandle<T> {
    future: BoxFuture<'static, StreamResult<T>>,
}

impl<T: Send + 'static> CompletionHandle<T> {
    /// Wraps a future.
    pub fn new(future: impl Future<Output = StreamResult<T>> + Send + 'static) -> Self {
        Self {
            future: future.boxed(),
        }
    }

    /// A handle resolving immediately with `result`.
    pub fn ready(result: StreamResult<T>) -> Self {
        Self::new(futures::future::ready(result))
    }

    pub(crate) fn from_receiver(rx: oneshot::Receiver<StreamResult<T>>) -> Self {
        Self::new(async move { rx.await.unwrap_or(Err(StreamError::Cancelled)) })
    }

    /// Transforms a successful result.
    pub fn map<R: Send + 'static>(
        self,
        f: impl FnOnce(T) -> StreamResult<R> + Send + 'static,
    ) -> CompletionHandle<R> {
        CompletionHandle::new(self.future.map(|result| result.and_then(f)))
    }
}

impl<T> Future for CompletionHandle<T> {
    type Output = StreamResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.poll_unpin(cx)
    }
}

impl<T> fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle").finish_non_exhaustive()
    }
}

/// A built publisher-shaped graph.
///
/// Starts when subscribed; accepts one subscriber.
pub struct PublisherHandle {
    outlet: OutletPublisher,
    monitor: Arc<Monitor>,
}

impl PublisherHandle {
    pub(crate) fn new(outlet: OutletPublisher, monitor: Arc<Monitor>) -> Self {
        Self {
            outlet: monitor.attach(outlet),
            monitor,
        }
    }

    /// Returns the artifact's id, as reported in events.
    #[must_use]
    pub fn artifact_id(&self) -> Uuid {
        self.monitor.artifact_id()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.outlet.state()
    }

    /// Views this publisher as a publisher of `T`.
    #[must_use]
    pub fn typed<T: 'static>(self) -> TypedPublisher<T> {
        TypedPublisher::new(Arc::new(self))
    }
}

impl Publisher<Element> for PublisherHandle {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<Element>>) {
        self.outlet.subscribe(subscriber);
    }
}

impl fmt::Debug for PublisherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherHandle")
            .field("artifact_id", &self.artifact_id())
            .field("state", &self.state())
            .finish()
    }
}

/// A built subscriber-shaped graph and the handle to its result.
///
/// The graph is already running: it waits for `on_subscribe` and then pulls
/// through the subscription.
pub struct SubscriberWithCompletion {
    subscriber: Arc<InletSubscriber>,
    completion: CompletionHandle<Element>,
    artifact_id: Uuid,
}

impl SubscriberWithCompletion {
    pub(crate) fn new(subscriber: Arc<InletSubscriber>, completion: CompletionHandle<Element>, artifact_id: Uuid) -> Self {
        Self {
            subscriber,
            completion,
            artifact_id,
        }
    }

    /// Returns the subscriber feeding the graph.
    #[must_use]
    pub fn subscriber(&self) -> Arc<dyn Subscriber<Element>> {
        self.subscriber.clone()
    }

    /// Returns the subscriber's lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.subscriber.state()
    }

    /// Returns the artifact's id, as reported in events.
    #[must_use]
    pub fn artifact_id(&self) -> Uuid {
        self.artifact_id
    }

    /// Returns the completion handle, discarding the subscriber.
    pub fn completion(self) -> CompletionHandle<Element> {
        self.completion
    }

    /// Splits into the subscriber and the completion handle.
    pub fn into_parts(self) -> (Arc<dyn Subscriber<Element>>, CompletionHandle<Element>) {
        (self.subscriber, self.completion)
    }

    /// Splits into a subscriber of `T` and the completion handle.
    pub fn into_typed<T: Send + 'static>(self) -> (Arc<dyn Subscriber<T>>, CompletionHandle<Element>) {
        (Arc::new(TypedSubscriber::<T>::new(self.subscriber)), self.completion)
    }
}

impl fmt::Debug for SubscriberWithCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberWithCompletion")
            .field("artifact_id", &self.artifact_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A built processor-shaped graph.
///
/// Elements received as a subscriber flow through the graph to the single
/// subscriber of the publisher side. Starts when that subscriber arrives.
pub struct ProcessorHandle {
    inlet: Arc<InletSubscriber>,
    outlet: OutletPublisher,
    monitor: Arc<Monitor>,
}

impl ProcessorHandle {
    pub(crate) fn new(inlet: Arc<InletSubscriber>, outlet: OutletPublisher, monitor: Arc<Monitor>) -> Self {
        Self {
            inlet,
            outlet: monitor.attach(outlet),
            monitor,
        }
    }

    /// Returns the artifact's id, as reported in events.
    #[must_use]
    pub fn artifact_id(&self) -> Uuid {
        self.monitor.artifact_id()
    }

    /// Returns the publisher side's lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.outlet.state()
    }

    /// Views this processor as a processor from `T` to `R`.
    #[must_use]
    pub fn typed<T: Send + 'static, R: 'static>(self) -> TypedProcessor<T, R> {
        let this = Arc::new(self);
        TypedProcessor::new(this.clone(), this)
    }
}

impl Subscriber<Element> for ProcessorHandle {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.inlet.on_subscribe(subscription);
    }

    fn on_next(&self, item: Element) {
        self.inlet.on_next(item);
    }

    fn on_error(&self, error: StreamError) {
        self.inlet.on_error(error);
    }

    fn on_complete(&self) {
        self.inlet.on_complete();
    }
}

impl Publisher<Element> for ProcessorHandle {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<Element>>) {
        self.outlet.subscribe(subscriber);
    }
}

impl fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("artifact_id", &self.artifact_id())
            .field("state", &self.state())
            .finish()
    }
}
