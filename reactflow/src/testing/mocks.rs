//! Hand-driven publishers and ack probes for tests.

use crate::errors::{AckError, StreamError};
use crate::message::AckFuture;
use crate::reactive::{Publisher, Subscriber, Subscription};
use futures::future::{self, FutureExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct ManualSubscription {
    requested: AtomicU64,
    cancelled: AtomicBool,
    notify: Arc<Notify>,
}

impl Subscription for ManualSubscription {
    fn request(&self, n: u64) {
        self.requested.fetch_add(n, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

/// A publisher the test pushes signals through by hand.
///
/// Accepts one subscriber and records the demand it requests and whether it
/// cancelled. Emitting beyond the requested demand is allowed, so tests can
/// provoke protocol violations.
pub struct ManualPublisher<T> {
    subscriber: Mutex<Option<Arc<dyn Subscriber<T>>>>,
    subscription: Arc<ManualSubscription>,
    emitted: AtomicU64,
    subscribe_count: AtomicUsize,
}

impl<T: Send + 'static> ManualPublisher<T> {
    /// Creates a publisher with no subscriber.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriber: Mutex::new(None),
            subscription: Arc::new(ManualSubscription::default()),
            emitted: AtomicU64::new(0),
            subscribe_count: AtomicUsize::new(0),
        })
    }

    /// Delivers an element to the subscriber, if there is one.
    pub fn emit(&self, item: T) {
        let subscriber = self.subscriber.lock().clone();
        if let Some(subscriber) = subscriber {
            self.emitted.fetch_add(1, Ordering::SeqCst);
            subscriber.on_next(item);
        }
    }

    /// Completes the subscriber.
    pub fn complete(&self) {
        let subscriber = self.subscriber.lock().take();
        if let Some(subscriber) = subscriber {
            subscriber.on_complete();
        }
    }

    /// Fails the subscriber.
    pub fn fail(&self, error: StreamError) {
        let subscriber = self.subscriber.lock().take();
        if let Some(subscriber) = subscriber {
            subscriber.on_error(error);
        }
    }

    /// Returns the total demand requested so far.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.subscription.requested.load(Ordering::SeqCst)
    }

    /// Returns the demand not yet satisfied by emitted elements.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.requested()
            .saturating_sub(self.emitted.load(Ordering::SeqCst))
    }

    /// Returns true once the subscriber cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.subscription.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the number of `subscribe` calls received.
    #[must_use]
    pub fn subscribe_count(&self) -> usize {
        self.subscribe_count.load(Ordering::SeqCst)
    }

    /// Waits until the subscriber requested at least `n` in total.
    ///
    /// # Panics
    ///
    /// Panics if the timeout elapses first.
    pub async fn wait_for_request(&self, n: u64, timeout: Duration) {
        self.wait_until(timeout, |p| p.requested() >= n).await;
    }

    /// Waits until the subscriber cancelled.
    ///
    /// # Panics
    ///
    /// Panics if the timeout elapses first.
    pub async fn wait_for_cancel(&self, timeout: Duration) {
        self.wait_until(timeout, Self::is_cancelled).await;
    }

    async fn wait_until(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) {
        let notify = self.subscription.notify.clone();
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let notified = notify.notified();
                if condition(self) {
                    return;
                }
                notified.await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out after {timeout:?}");
    }
}

impl<T: Send + 'static> Publisher<T> for ManualPublisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        self.subscribe_count.fetch_add(1, Ordering::SeqCst);
        {
            let mut slot = self.subscriber.lock();
            if slot.is_some() {
                drop(slot);
                subscriber.on_subscribe(Arc::new(crate::reactive::NoopSubscription));
                subscriber.on_error(StreamError::AlreadySubscribed);
                return;
            }
            *slot = Some(subscriber.clone());
        }
        subscriber.on_subscribe(self.subscription.clone());
    }
}

/// Counts acknowledgements and optionally fails them.
#[derive(Clone, Default)]
pub struct AckProbe {
    count: Arc<AtomicUsize>,
    failure: Option<String>,
}

impl AckProbe {
    /// Creates a probe whose acks succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a probe whose acks fail with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(0)),
            failure: Some(message.into()),
        }
    }

    /// Returns an ack supplier counting its invocations.
    pub fn supplier(&self) -> impl Fn() -> AckFuture + Send + Sync + 'static {
        let count = self.count.clone();
        let failure = self.failure.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            let result = failure.clone().map_or(Ok(()), |m| Err(AckError::msg(m)));
            future::ready(result).boxed()
        }
    }

    /// Returns the number of acknowledgements performed.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}
