//! Runtime operators.
//!
//! Every operator owns its upstream as an `Option<ElementStream>` and sets it
//! to `None` as soon as it will not pull again, which drops (and so cancels)
//! everything above it. Consumers stop polling after the first `Err` item.

use crate::errors::{StreamError, StreamResult};
use crate::graph::{Element, ElementsFn, SourceFutureFn, StageKind};
pub(crate) use crate::reactive::{guard, panicked};
use crate::reactive::{ElementStream, Inlet, InletStream, Publisher};
use futures::future::{self, FutureExt};
use futures::stream::{self, Stream, StreamExt};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::warn;

/// A stream failing immediately with `error`.
pub(crate) fn failed(error: StreamError) -> ElementStream {
    stream::once(future::ready(Err(error))).boxed()
}

/// A stream emitting one element.
pub(crate) fn just(element: Element) -> ElementStream {
    stream::once(future::ready(Ok(element))).boxed()
}

/// A stream built on first poll. Dropping it unpolled drops `start` unused.
pub(crate) fn deferred(
    stage: StageKind,
    start: impl FnOnce() -> ElementStream + Send + 'static,
) -> ElementStream {
    stream::once(future::lazy(move |_| {
        guard(stage, || Ok(start())).unwrap_or_else(failed)
    }))
    .flatten()
    .boxed()
}

/// Resolves a user future, catching panics while it is polled.
pub(crate) fn guarded_future<T: Send + 'static>(
    stage: StageKind,
    fut: future::BoxFuture<'static, StreamResult<T>>,
) -> future::BoxFuture<'static, StreamResult<T>> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .map(move |result| result.unwrap_or_else(|payload| Err(panicked(stage, &*payload))))
        .boxed()
}

// ----- sources -----

/// Emits the elements of a fresh iterator, created on first poll.
pub(crate) struct IterSource {
    factory: Option<ElementsFn>,
    iter: Option<Box<dyn Iterator<Item = Element> + Send>>,
}

impl IterSource {
    pub(crate) fn new(factory: ElementsFn) -> ElementStream {
        Self {
            factory: Some(factory),
            iter: None,
        }
        .boxed()
    }
}

impl Stream for IterSource {
    type Item = StreamResult<Element>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(factory) = this.factory.take() {
            match guard(StageKind::Of, || Ok(factory())) {
                Ok(iter) => this.iter = Some(iter),
                Err(error) => return Poll::Ready(Some(Err(error))),
            }
        }
        let Some(iter) = this.iter.as_mut() else {
            return Poll::Ready(None);
        };
        match guard(StageKind::Of, || Ok(iter.next())) {
            Ok(Some(element)) => Poll::Ready(Some(Ok(element))),
            Ok(None) => {
                this.iter = None;
                Poll::Ready(None)
            }
            Err(error) => {
                this.iter = None;
                Poll::Ready(Some(Err(error)))
            }
        }
    }
}

/// Emits what an external publisher emits.
///
/// Subscribes on first poll. If dropped before that, it still subscribes and
/// cancels right away, so the publisher always observes the cancellation.
pub(crate) struct PublisherSource {
    publisher: Option<Arc<dyn Publisher<Element>>>,
    inlet: Option<InletStream>,
    buffer_size: usize,
}

impl PublisherSource {
    pub(crate) fn new(publisher: Arc<dyn Publisher<Element>>, buffer_size: usize) -> ElementStream {
        Self {
            publisher: Some(publisher),
            inlet: None,
            buffer_size,
        }
        .boxed()
    }
}

impl Stream for PublisherSource {
    type Item = StreamResult<Element>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(publisher) = this.publisher.take() {
            let (subscriber, stream) = Inlet::new(this.buffer_size);
            this.inlet = Some(stream);
            if let Err(error) = guard(StageKind::FromPublisher, || {
                publisher.subscribe(subscriber);
                Ok(())
            }) {
                this.inlet = None;
                return Poll::Ready(Some(Err(error)));
            }
        }
        match this.inlet.as_mut() {
            Some(inlet) => inlet.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for PublisherSource {
    fn drop(&mut self) {
        if let Some(publisher) = self.publisher.take() {
            let (subscriber, stream) = Inlet::new(1);
            drop(stream);
            if let Err(error) = guard(StageKind::FromPublisher, || {
                publisher.subscribe(subscriber);
                Ok(())
            }) {
                warn!(error = %error, "Publisher panicked while being cancelled");
            }
        }
    }
}

/// Emits the value of a future created on first poll.
pub(crate) fn future_source(future: SourceFutureFn, nullable: bool) -> ElementStream {
    async move {
        let fut = match guard(StageKind::FromFuture, || Ok(future())) {
            Ok(fut) => fut,
            Err(error) => return Some(Err(error)),
        };
        match guarded_future(StageKind::FromFuture, fut).await {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) if nullable => None,
            Ok(None) => Some(Err(StreamError::MissingValue)),
            Err(error) => Some(Err(error)),
        }
    }
    .into_stream()
    .filter_map(future::ready)
    .boxed()
}

// ----- element-wise operators -----

/// What an element-wise operator does with one element.
pub(crate) enum Step {
    /// Emit the result; an `Err` ends the stream.
    Emit(StreamResult<Element>),
    /// Drop the element and pull the next one.
    Skip,
    /// Emit the element, then complete without pulling again.
    Last(Element),
    /// Complete without emitting.
    Complete,
}

/// An element-wise operator driven by a [`Step`] function.
pub(crate) struct Op<F> {
    upstream: Option<ElementStream>,
    step: F,
    finished: bool,
}

impl<F> Op<F>
where
    F: FnMut(Element) -> Step + Send + Unpin + 'static,
{
    pub(crate) fn new(upstream: ElementStream, step: F) -> ElementStream {
        Self {
            upstream: Some(upstream),
            step,
            finished: false,
        }
        .boxed()
    }
}

impl Op<fn(Element) -> Step> {
    /// An operator that completes on first poll without pulling.
    pub(crate) fn finished(upstream: ElementStream) -> ElementStream {
        Self {
            upstream: Some(upstream),
            step: |_| Step::Complete,
            finished: true,
        }
        .boxed()
    }
}

impl<F> Stream for Op<F>
where
    F: FnMut(Element) -> Step + Send + Unpin,
{
    type Item = StreamResult<Element>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            this.upstream = None;
            return Poll::Ready(None);
        }
        loop {
            let Some(upstream) = this.upstream.as_mut() else {
                return Poll::Ready(None);
            };
            let step = match ready!(upstream.poll_next_unpin(cx)) {
                Some(Ok(element)) => (this.step)(element),
                Some(Err(error)) => Step::Emit(Err(error)),
                None => Step::Complete,
            };
            match step {
                Step::Emit(Ok(element)) => return Poll::Ready(Some(Ok(element))),
                Step::Emit(Err(error)) => {
                    this.upstream = None;
                    return Poll::Ready(Some(Err(error)));
                }
                Step::Skip => {}
                Step::Last(element) => {
                    this.upstream = None;
                    return Poll::Ready(Some(Ok(element)));
                }
                Step::Complete => {
                    this.upstream = None;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

/// Expands a user-supplied element into a sub-stream.
pub(crate) type ExpandFn = Box<dyn FnMut(Element) -> StreamResult<ElementStream> + Send>;

/// Replaces each element by a sub-stream, draining one sub-stream at a time.
pub(crate) struct FlatMap {
    upstream: Option<ElementStream>,
    inner: Option<ElementStream>,
    expand: ExpandFn,
}

impl FlatMap {
    pub(crate) fn new(upstream: ElementStream, expand: ExpandFn) -> ElementStream {
        Self {
            upstream: Some(upstream),
            inner: None,
            expand,
        }
        .boxed()
    }

    fn fail(&mut self, error: StreamError) -> Poll<Option<StreamResult<Element>>> {
        self.inner = None;
        self.upstream = None;
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for FlatMap {
    type Item = StreamResult<Element>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(inner) = this.inner.as_mut() {
                match ready!(inner.poll_next_unpin(cx)) {
                    Some(Ok(element)) => return Poll::Ready(Some(Ok(element))),
                    Some(Err(error)) => return this.fail(error),
                    None => this.inner = None,
                }
                continue;
            }

            let Some(upstream) = this.upstream.as_mut() else {
                return Poll::Ready(None);
            };
            match ready!(upstream.poll_next_unpin(cx)) {
                Some(Ok(element)) => match (this.expand)(element) {
                    Ok(inner) => this.inner = Some(inner),
                    Err(error) => return this.fail(error),
                },
                Some(Err(error)) => return this.fail(error),
                None => {
                    this.upstream = None;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

// ----- terminal-signal operators -----

/// A callback observing the end of a stream.
#[derive(Clone)]
pub(crate) enum TapHook {
    /// Runs on failure, with the error.
    Error(crate::graph::ErrorFn),
    /// Runs on normal completion.
    Complete(crate::graph::CallbackFn),
    /// Runs on completion, failure or cancellation.
    Terminate(crate::graph::CallbackFn),
}

/// Passes elements through and runs a hook when the stream ends.
///
/// A hook that panics replaces the terminal signal by the panic error.
pub(crate) struct Tap {
    upstream: Option<ElementStream>,
    hook: TapHook,
    polled: bool,
    fired: bool,
}

impl Tap {
    pub(crate) fn new(upstream: ElementStream, hook: TapHook) -> ElementStream {
        Self {
            upstream: Some(upstream),
            hook,
            polled: false,
            fired: false,
        }
        .boxed()
    }

    fn on_error(&self, error: &StreamError) -> StreamResult<()> {
        match &self.hook {
            TapHook::Error(f) => guard(StageKind::OnError, || {
                f(error);
                Ok(())
            }),
            TapHook::Terminate(f) => guard(StageKind::OnTerminate, || {
                f();
                Ok(())
            }),
            TapHook::Complete(_) => Ok(()),
        }
    }

    fn on_complete(&self) -> StreamResult<()> {
        match &self.hook {
            TapHook::Complete(f) => guard(StageKind::OnComplete, || {
                f();
                Ok(())
            }),
            TapHook::Terminate(f) => guard(StageKind::OnTerminate, || {
                f();
                Ok(())
            }),
            TapHook::Error(_) => Ok(()),
        }
    }
}

impl Stream for Tap {
    type Item = StreamResult<Element>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(upstream) = this.upstream.as_mut() else {
            return Poll::Ready(None);
        };
        this.polled = true;
        match ready!(upstream.poll_next_unpin(cx)) {
            Some(Ok(element)) => Poll::Ready(Some(Ok(element))),
            Some(Err(error)) => {
                this.upstream = None;
                this.fired = true;
                match this.on_error(&error) {
                    Ok(()) => Poll::Ready(Some(Err(error))),
                    Err(hook_error) => Poll::Ready(Some(Err(hook_error))),
                }
            }
            None => {
                this.upstream = None;
                this.fired = true;
                match this.on_complete() {
                    Ok(()) => Poll::Ready(None),
                    Err(hook_error) => Poll::Ready(Some(Err(hook_error))),
                }
            }
        }
    }
}

impl Drop for Tap {
    // A stream dropped before its first poll never ran, so it did not terminate.
    fn drop(&mut self) {
        if self.fired || !self.polled {
            return;
        }
        self.upstream = None;
        if let TapHook::Terminate(f) = &self.hook {
            if let Err(error) = guard(StageKind::OnTerminate, || {
                f();
                Ok(())
            }) {
                warn!(error = %error, "Termination hook failed during cancellation");
            }
        }
    }
}

/// Builds the replacement stream for a failed upstream.
pub(crate) type RecoverStreamFn = Box<dyn FnOnce(StreamError) -> StreamResult<ElementStream> + Send>;

/// Switches to a recovery stream on the first upstream failure.
pub(crate) struct Recover {
    upstream: Option<ElementStream>,
    recover: Option<RecoverStreamFn>,
}

impl Recover {
    pub(crate) fn new(upstream: ElementStream, recover: RecoverStreamFn) -> ElementStream {
        Self {
            upstream: Some(upstream),
            recover: Some(recover),
        }
        .boxed()
    }
}

impl Stream for Recover {
    type Item = StreamResult<Element>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            let Some(upstream) = this.upstream.as_mut() else {
                return Poll::Ready(None);
            };
            match ready!(upstream.poll_next_unpin(cx)) {
                Some(Ok(element)) => return Poll::Ready(Some(Ok(element))),
                Some(Err(error)) => {
                    this.upstream = None;
                    let Some(recover) = this.recover.take() else {
                        return Poll::Ready(Some(Err(error)));
                    };
                    match recover(error) {
                        Ok(replacement) => this.upstream = Some(replacement),
                        Err(error) => return Poll::Ready(Some(Err(error))),
                    }
                }
                None => {
                    this.upstream = None;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualPublisher;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ints(values: Vec<i32>) -> ElementStream {
        stream::iter(values.into_iter().map(|v| Ok(Element::new(v)))).boxed()
    }

    fn drain(stream: ElementStream) -> (Vec<i32>, Option<StreamError>) {
        block_on(async move {
            let mut stream = stream;
            let mut items = Vec::new();
            while let Some(next) = stream.next().await {
                match next {
                    Ok(element) => items.push(element.downcast::<i32>().unwrap()),
                    Err(error) => return (items, Some(error)),
                }
            }
            (items, None)
        })
    }

    #[test]
    fn test_iter_source_is_lazy_and_fresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory: ElementsFn = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new((1..=3).map(Element::new)) as Box<dyn Iterator<Item = Element> + Send>
        });

        let first = IterSource::new(factory.clone());
        let second = IterSource::new(factory);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(drain(first).0, vec![1, 2, 3]);
        assert_eq!(drain(second).0, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_op_stops_after_error() {
        let mut seen = Vec::new();
        let stream = Op::new(ints(vec![1, 2, 3]), move |element| {
            let value = element.downcast::<i32>().unwrap_or_default();
            seen.push(value);
            if value == 2 {
                Step::Emit(Err(StreamError::protocol("two")))
            } else {
                Step::Emit(Ok(Element::new(value * 10)))
            }
        });
        let (items, error) = drain(stream);
        assert_eq!(items, vec![10]);
        assert!(matches!(error, Some(StreamError::Protocol(_))));
    }

    #[test]
    fn test_op_last_and_finished() {
        let mut left = 2;
        let limited = Op::new(ints(vec![1, 2, 3]), move |element| {
            left -= 1;
            if left == 0 {
                Step::Last(element)
            } else {
                Step::Emit(Ok(element))
            }
        });
        assert_eq!(drain(limited).0, vec![1, 2]);
        assert_eq!(drain(Op::finished(ints(vec![1]))).0, Vec::<i32>::new());
    }

    #[test]
    fn test_flat_map_drains_sequentially() {
        let stream = FlatMap::new(
            ints(vec![1, 2]),
            Box::new(|element| {
                let value = element.downcast::<i32>()?;
                Ok(ints(vec![value, value * 100]))
            }),
        );
        assert_eq!(drain(stream).0, vec![1, 100, 2, 200]);
    }

    #[test]
    fn test_tap_runs_terminate_on_drop_once_started() {
        let calls = Arc::new(AtomicUsize::new(0));
        let terminate = |calls: &Arc<AtomicUsize>| {
            let counter = calls.clone();
            TapHook::Terminate(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        };

        drop(Tap::new(ints(vec![1, 2]), terminate(&calls)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut started = Tap::new(ints(vec![1, 2]), terminate(&calls));
        let first = block_on(started.next()).unwrap().unwrap();
        assert_eq!(first.downcast::<i32>().unwrap(), 1);
        drop(started);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tap_complete_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stream = Tap::new(
            ints(vec![1]),
            TapHook::Complete(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert_eq!(drain(stream).0, vec![1]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recover_switches_once() {
        let upstream = ints(vec![1])
            .chain(failed(StreamError::protocol("first")))
            .boxed();
        let stream = Recover::new(
            upstream,
            Box::new(|_| Ok(ints(vec![7]).chain(failed(StreamError::protocol("second"))).boxed())),
        );
        let (items, error) = drain(stream);
        assert_eq!(items, vec![1, 7]);
        assert_eq!(error.map(|e| e.to_string()), Some("Protocol violation: second".to_string()));
    }

    #[test]
    fn test_future_source_nullable() {
        let none: SourceFutureFn = Arc::new(|| future::ready(Ok(None)).boxed());
        let (items, error) = drain(future_source(none.clone(), true));
        assert!(items.is_empty());
        assert!(error.is_none());
        assert!(matches!(
            drain(future_source(none, false)).1,
            Some(StreamError::MissingValue)
        ));
    }

    #[test]
    fn test_unpolled_publisher_source_cancels_on_drop() {
        let publisher = ManualPublisher::<Element>::new();
        let source = PublisherSource::new(publisher.clone(), 4);
        assert_eq!(publisher.subscribe_count(), 0);

        drop(source);
        assert_eq!(publisher.subscribe_count(), 1);
        assert!(publisher.is_cancelled());
        assert_eq!(publisher.requested(), 0);
    }
}
