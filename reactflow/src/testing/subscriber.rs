//! A recording subscriber for tests.

use crate::errors::StreamError;
use crate::reactive::{Subscriber, Subscription};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// A signal observed by a [`TestSubscriber`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `on_subscribe`.
    Subscribe,
    /// `on_next`.
    Next,
    /// `on_error`.
    Error,
    /// `on_complete`.
    Complete,
}

struct Recorded<T> {
    items: Vec<T>,
    signals: Vec<Signal>,
    error: Option<StreamError>,
    completed: bool,
}

/// A subscriber that records every signal and lets the test drive demand.
///
/// Also checks the protocol: overlapping signals and signals after a terminal
/// one are counted as violations.
pub struct TestSubscriber<T> {
    recorded: Mutex<Recorded<T>>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    pending_request: AtomicU64,
    cancel_on_subscribe: AtomicBool,
    in_signal: AtomicBool,
    violations: AtomicUsize,
    notify: Notify,
}

impl<T: Send + 'static> TestSubscriber<T> {
    /// Creates a subscriber that requests nothing by itself.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            recorded: Mutex::new(Recorded {
                items: Vec::new(),
                signals: Vec::new(),
                error: None,
                completed: false,
            }),
            subscription: Mutex::new(None),
            pending_request: AtomicU64::new(0),
            cancel_on_subscribe: AtomicBool::new(false),
            in_signal: AtomicBool::new(false),
            violations: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    /// Creates a subscriber that requests `n` as soon as it is subscribed.
    #[must_use]
    pub fn requesting(n: u64) -> Arc<Self> {
        let subscriber = Self::new();
        subscriber.pending_request.store(n, Ordering::SeqCst);
        subscriber
    }

    /// Requests `n` more elements, or remembers the request until subscribed.
    pub fn request(&self, n: u64) {
        let subscription = self.subscription.lock().clone();
        match subscription {
            Some(subscription) => subscription.request(n),
            None => {
                self.pending_request.fetch_add(n, Ordering::SeqCst);
            }
        }
    }

    /// Cancels the subscription, or cancels as soon as one arrives.
    pub fn cancel(&self) {
        let subscription = self.subscription.lock().clone();
        match subscription {
            Some(subscription) => subscription.cancel(),
            None => self.cancel_on_subscribe.store(true, Ordering::SeqCst),
        }
    }

    /// Returns the number of elements received.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.recorded.lock().items.len()
    }

    /// Removes and returns the elements received so far.
    pub fn take_items(&self) -> Vec<T> {
        std::mem::take(&mut self.recorded.lock().items)
    }

    /// Returns the signals received, in order.
    #[must_use]
    pub fn signals(&self) -> Vec<Signal> {
        self.recorded.lock().signals.clone()
    }

    /// Returns the terminal error, if any.
    #[must_use]
    pub fn error(&self) -> Option<StreamError> {
        self.recorded.lock().error.clone()
    }

    /// Returns true once `on_complete` was received.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.recorded.lock().completed
    }

    /// Returns true once a terminal signal was received.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        let recorded = self.recorded.lock();
        recorded.completed || recorded.error.is_some()
    }

    /// Returns true once `on_subscribe` was received.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Returns the number of protocol violations seen.
    #[must_use]
    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` elements arrived.
    ///
    /// # Panics
    ///
    /// Panics if the timeout elapses first.
    pub async fn wait_for_items(&self, n: usize, timeout: Duration) {
        self.wait_until(timeout, |s| s.item_count() >= n || s.is_terminated())
            .await;
        assert!(
            self.item_count() >= n,
            "stream terminated after {} of {n} elements",
            self.item_count()
        );
    }

    /// Waits for a terminal signal.
    ///
    /// # Panics
    ///
    /// Panics if the timeout elapses first.
    pub async fn await_terminal(&self, timeout: Duration) {
        self.wait_until(timeout, Self::is_terminated).await;
    }

    async fn wait_until(&self, timeout: Duration, condition: impl Fn(&Self) -> bool) {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if condition(self) {
                    return;
                }
                notified.await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out after {timeout:?}");
    }

    fn enter(&self, signal: Signal) {
        if self.in_signal.swap(true, Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        let mut recorded = self.recorded.lock();
        if recorded.completed || recorded.error.is_some() {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        recorded.signals.push(signal);
    }

    fn exit(&self) {
        self.in_signal.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl<T: Clone + Send + 'static> TestSubscriber<T> {
    /// Returns a copy of the elements received so far.
    #[must_use]
    pub fn items(&self) -> Vec<T> {
        self.recorded.lock().items.clone()
    }
}

impl<T: Send + 'static> Subscriber<T> for TestSubscriber<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        self.enter(Signal::Subscribe);
        *self.subscription.lock() = Some(subscription.clone());
        self.exit();

        if self.cancel_on_subscribe.load(Ordering::SeqCst) {
            subscription.cancel();
            return;
        }
        let pending = self.pending_request.swap(0, Ordering::SeqCst);
        if pending > 0 {
            subscription.request(pending);
        }
    }

    fn on_next(&self, item: T) {
        self.enter(Signal::Next);
        self.recorded.lock().items.push(item);
        self.exit();
    }

    fn on_error(&self, error: StreamError) {
        self.enter(Signal::Error);
        self.recorded.lock().error = Some(error);
        self.exit();
    }

    fn on_complete(&self) {
        self.enter(Signal::Complete);
        self.recorded.lock().completed = true;
        self.exit();
    }
}
