//! Subscriber-to-stream bridge.
//!
//! An [`Inlet`] has two halves: an [`InletSubscriber`] that an external
//! publisher delivers signals to, and an [`InletStream`] that the operator
//! chain pulls from. Demand is only requested while the stream is being
//! polled, in batches of at most the configured buffer size, so the buffered
//! elements never exceed that size for a well-behaved publisher.

use super::{Lifecycle, LifecycleState, Subscriber, Subscription};
use crate::errors::{StreamError, StreamResult};
use crate::graph::Element;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use tracing::{debug, warn};

#[derive(Default)]
struct InletState {
    subscription: Option<Arc<dyn Subscription>>,
    queue: VecDeque<Element>,
    /// Requested but not yet delivered.
    outstanding: u64,
    /// `Some(None)` for completion, `Some(Some(e))` for failure.
    terminal: Option<Option<StreamError>>,
    finished: bool,
    detached: bool,
    waker: Option<Waker>,
}

impl InletState {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }

    fn is_closed(&self) -> bool {
        self.detached || self.terminal.is_some() || self.finished
    }

    /// Returns the amount to request to bring buffered plus outstanding
    /// elements back up to `batch`, once they fell to half of it.
    fn replenish(&mut self, batch: u64) -> Option<(Arc<dyn Subscription>, u64)> {
        if self.is_closed() {
            return None;
        }
        let subscription = self.subscription.as_ref()?;
        let in_flight = self.outstanding + self.queue.len() as u64;
        if in_flight > batch / 2 {
            return None;
        }
        let n = batch - in_flight;
        if n == 0 {
            return None;
        }
        self.outstanding += n;
        Some((subscription.clone(), n))
    }
}

struct Shared {
    state: Mutex<InletState>,
    lifecycle: Lifecycle,
    batch: u64,
}

/// Factory for connected subscriber/stream pairs.
#[derive(Debug, Clone, Copy)]
pub struct Inlet;

impl Inlet {
    /// Creates a connected pair requesting at most `buffer_size` elements ahead.
    #[must_use]
    pub fn new(buffer_size: usize) -> (Arc<InletSubscriber>, InletStream) {
        let shared = Arc::new(Shared {
            state: Mutex::new(InletState::default()),
            lifecycle: Lifecycle::new(),
            batch: buffer_size.max(1) as u64,
        });
        (
            Arc::new(InletSubscriber {
                shared: shared.clone(),
            }),
            InletStream { shared },
        )
    }
}

/// The subscriber half of an [`Inlet`].
pub struct InletSubscriber {
    shared: Arc<Shared>,
}

impl InletSubscriber {
    /// Returns the lifecycle state of the inlet.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.shared.lifecycle.state()
    }
}

impl Subscriber<Element> for InletSubscriber {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let rejected = {
            let mut state = self.shared.state.lock();
            if state.subscription.is_some() || state.is_closed() {
                true
            } else {
                state.subscription = Some(subscription.clone());
                self.shared.lifecycle.activate();
                state.wake();
                false
            }
        };

        if rejected {
            debug!("Inlet rejecting subscription: already subscribed or closed");
            subscription.cancel();
        }
    }

    fn on_next(&self, item: Element) {
        let overflow = {
            let mut state = self.shared.state.lock();
            if state.is_closed() {
                return;
            }
            if state.outstanding == 0 {
                warn!("Publisher emitted more elements than requested");
                state.terminal = Some(Some(StreamError::protocol(
                    "publisher emitted more elements than requested",
                )));
                state.wake();
                state.subscription.take()
            } else {
                state.outstanding -= 1;
                state.queue.push_back(item);
                state.wake();
                None
            }
        };

        if let Some(subscription) = overflow {
            subscription.cancel();
        }
    }

    fn on_error(&self, error: StreamError) {
        let mut state = self.shared.state.lock();
        if state.is_closed() {
            return;
        }
        state.terminal = Some(Some(error));
        state.subscription = None;
        state.wake();
    }

    fn on_complete(&self) {
        let mut state = self.shared.state.lock();
        if state.is_closed() {
            return;
        }
        state.terminal = Some(None);
        state.subscription = None;
        state.wake();
    }
}

/// The stream half of an [`Inlet`].
///
/// Dropping it cancels the upstream subscription, now or as soon as one
/// arrives.
pub struct InletStream {
    shared: Arc<Shared>,
}

impl Stream for InletStream {
    type Item = StreamResult<Element>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let shared = &self.shared;
        loop {
            let request = {
                let mut state = shared.state.lock();

                if let Some(item) = state.queue.pop_front() {
                    let request = state.replenish(shared.batch);
                    drop(state);
                    if let Some((subscription, n)) = request {
                        subscription.request(n);
                    }
                    return Poll::Ready(Some(Ok(item)));
                }

                if state.finished {
                    return Poll::Ready(None);
                }

                if let Some(terminal) = state.terminal.take() {
                    state.finished = true;
                    let to = if terminal.is_some() {
                        LifecycleState::Errored
                    } else {
                        LifecycleState::Completed
                    };
                    shared.lifecycle.terminate(to);
                    return Poll::Ready(terminal.map(Err));
                }

                state.waker = Some(cx.waker().clone());
                state.replenish(shared.batch)
            };

            match request {
                Some((subscription, n)) => subscription.request(n),
                None => return Poll::Pending,
            }
        }
    }
}

impl Drop for InletStream {
    fn drop(&mut self) {
        let subscription = {
            let mut state = self.shared.state.lock();
            let closed = state.terminal.is_some() || state.finished;
            state.detached = true;
            state.queue.clear();
            state.waker = None;
            let subscription = state.subscription.take();
            if closed {
                None
            } else {
                subscription
            }
        };

        if self.shared.lifecycle.terminate(LifecycleState::Cancelled) {
            debug!("Inlet detached before termination, cancelling upstream");
        }
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    #[derive(Default)]
    struct RecordingSubscription {
        requested: AtomicU64,
        cancelled: AtomicBool,
    }

    impl Subscription for RecordingSubscription {
        fn request(&self, n: u64) {
            self.requested.fetch_add(n, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_requests_batch_when_polled() {
        let (subscriber, mut stream) = Inlet::new(4);
        let subscription = Arc::new(RecordingSubscription::default());
        subscriber.on_subscribe(subscription.clone());
        assert_eq!(subscription.requested.load(Ordering::SeqCst), 0);

        let polled = futures::poll!(stream.next());
        assert!(polled.is_pending());
        assert_eq!(subscription.requested.load(Ordering::SeqCst), 4);

        subscriber.on_next(Element::new(1_i32));
        subscriber.on_complete();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.downcast::<i32>().unwrap(), 1);
        assert!(stream.next().await.is_none());
        assert_eq!(subscriber.state(), LifecycleState::Completed);
    }

    #[tokio::test]
    async fn test_overflow_is_protocol_violation() {
        let (subscriber, mut stream) = Inlet::new(2);
        let subscription = Arc::new(RecordingSubscription::default());
        subscriber.on_subscribe(subscription.clone());

        subscriber.on_next(Element::new(1_i32));

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
        assert!(subscription.cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_cancels_late_subscription() {
        let (subscriber, stream) = Inlet::new(2);
        drop(stream);

        let subscription = Arc::new(RecordingSubscription::default());
        subscriber.on_subscribe(subscription.clone());
        assert!(subscription.cancelled.load(Ordering::SeqCst));
        assert_eq!(subscriber.state(), LifecycleState::Cancelled);
    }

    #[test]
    fn test_second_subscription_rejected() {
        let (subscriber, _stream) = Inlet::new(2);
        let first = Arc::new(RecordingSubscription::default());
        let second = Arc::new(RecordingSubscription::default());

        subscriber.on_subscribe(first.clone());
        subscriber.on_subscribe(second.clone());

        assert!(!first.cancelled.load(Ordering::SeqCst));
        assert!(second.cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let (subscriber, mut stream) = Inlet::new(2);
        subscriber.on_subscribe(Arc::new(RecordingSubscription::default()));
        subscriber.on_error(StreamError::upstream(anyhow::anyhow!("gone")));
        subscriber.on_complete();

        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
        assert_eq!(subscriber.state(), LifecycleState::Errored);
    }
}
