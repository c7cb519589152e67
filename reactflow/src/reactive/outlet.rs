//! Stream-to-publisher bridge.
//!
//! [`drive`] pulls from an [`ElementStream`] only while the subscriber has
//! outstanding demand and delivers every signal from a single task, so signals
//! never overlap. Cancelling drops the stream, which releases every operator
//! upstream of it.

use super::{
    guard, CancelSignal, Demand, ElementStream, Lifecycle, LifecycleState, NoopSubscription,
    Publisher, Subscriber, Subscription,
};
use crate::errors::StreamError;
use crate::graph::{Element, StageKind};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// How a driven stream ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The stream completed and `on_complete` was delivered.
    Completed,
    /// The stream failed and `on_error` was delivered, or the subscriber
    /// itself failed and no further signal was delivered.
    Failed(StreamError),
    /// The subscriber cancelled; no terminal signal was delivered.
    Cancelled,
}

impl Outcome {
    /// Returns the matching terminal lifecycle state.
    #[must_use]
    pub const fn lifecycle_state(&self) -> LifecycleState {
        match self {
            Self::Completed => LifecycleState::Completed,
            Self::Failed(_) => LifecycleState::Errored,
            Self::Cancelled => LifecycleState::Cancelled,
        }
    }
}

/// Elements delivered between voluntary yields of the driver task.
const YIELD_EVERY: u32 = 64;

/// Callback invoked once a driven stream ended.
pub type TerminateHook = Arc<dyn Fn(&Outcome) + Send + Sync>;

/// Callback invoked when the subscriber is accepted, before any signal.
pub type StartHook = Arc<dyn Fn() + Send + Sync>;

/// The subscription handed out by [`drive`].
#[derive(Debug, Default)]
pub struct OutletSubscription {
    demand: Demand,
    cancel: CancelSignal,
    failure: Mutex<Option<StreamError>>,
    zero_request: AtomicBool,
    notify: Notify,
}

impl OutletSubscription {
    /// Creates a subscription with no demand.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outstanding demand.
    #[must_use]
    pub fn demand(&self) -> u64 {
        self.demand.get()
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Subscription for OutletSubscription {
    fn request(&self, n: u64) {
        if n == 0 {
            self.zero_request.store(true, Ordering::SeqCst);
        } else if !self.demand.is_unbounded() {
            self.demand.add(n);
            if self.demand.is_unbounded() {
                debug!("Subscriber requested unbounded demand");
            }
        }
        self.notify.notify_one();
    }

    fn cancel(&self) {
        if self.cancel.cancel() {
            debug!("Outlet subscription cancelled");
        }
        self.notify.notify_one();
    }

    fn fail(&self, error: StreamError) {
        if !self.cancel.is_cancelled() {
            self.failure.lock().get_or_insert(error);
        }
        self.cancel();
    }
}

/// Ends a run stopped by the subscriber, as a failure if it reported one.
fn stopped(subscription: &OutletSubscription, lifecycle: &Lifecycle) -> Outcome {
    match subscription.failure.lock().take() {
        Some(error) => {
            debug!(error = %error, "Subscriber failed the subscription");
            lifecycle.terminate(LifecycleState::Errored);
            Outcome::Failed(error)
        }
        None => {
            lifecycle.terminate(LifecycleState::Cancelled);
            Outcome::Cancelled
        }
    }
}

/// Delivers a signal, reporting a panic in the subscriber as an error.
fn deliver(signal: impl FnOnce()) -> Result<(), StreamError> {
    guard(StageKind::ToSubscriber, || {
        signal();
        Ok(())
    })
}

/// Drives `stream` into `subscriber` until completion, failure or cancellation.
///
/// `on_subscribe` must already have been delivered with `subscription`. The
/// lifecycle reaches its terminal state before the terminal signal is
/// delivered. A subscriber that panics in `on_next` is abandoned and the run
/// fails with the panic.
pub async fn drive(
    mut stream: ElementStream,
    subscriber: Arc<dyn Subscriber<Element>>,
    subscription: Arc<OutletSubscription>,
    lifecycle: &Lifecycle,
) -> Outcome {
    lifecycle.activate();
    let mut delivered: u32 = 0;
    loop {
        loop {
            if subscription.cancel.is_cancelled() {
                return stopped(&subscription, lifecycle);
            }
            if subscription.zero_request.load(Ordering::SeqCst) {
                drop(stream);
                let error = StreamError::protocol("request(n) requires n > 0");
                warn!(error = %error, "Subscriber violated the demand protocol");
                lifecycle.terminate(LifecycleState::Errored);
                if let Err(panic) = deliver(|| subscriber.on_error(error.clone())) {
                    warn!(error = %panic, "Subscriber panicked in on_error");
                }
                return Outcome::Failed(error);
            }
            if subscription.demand.has_demand() {
                break;
            }
            subscription.notify.notified().await;
        }

        let next = tokio::select! {
            biased;
            () = subscription.cancel.cancelled() => None,
            next = stream.next() => Some(next),
        };

        match next {
            None => return stopped(&subscription, lifecycle),
            Some(Some(Ok(item))) => {
                if subscription.cancel.is_cancelled() {
                    return stopped(&subscription, lifecycle);
                }
                subscription.demand.try_take();
                if let Err(error) = deliver(|| subscriber.on_next(item)) {
                    drop(stream);
                    warn!(error = %error, "Subscriber panicked, abandoning it");
                    lifecycle.terminate(LifecycleState::Errored);
                    return Outcome::Failed(error);
                }
                // A ready source under unbounded demand must not monopolise the worker.
                delivered = delivered.wrapping_add(1);
                if delivered % YIELD_EVERY == 0 {
                    tokio::task::yield_now().await;
                }
            }
            Some(Some(Err(error))) => {
                drop(stream);
                lifecycle.terminate(LifecycleState::Errored);
                if let Err(panic) = deliver(|| subscriber.on_error(error.clone())) {
                    warn!(error = %panic, "Subscriber panicked in on_error");
                }
                return Outcome::Failed(error);
            }
            Some(None) => {
                drop(stream);
                lifecycle.terminate(LifecycleState::Completed);
                if let Err(panic) = deliver(|| subscriber.on_complete()) {
                    warn!(error = %panic, "Subscriber panicked in on_complete");
                }
                return Outcome::Completed;
            }
        }
    }
}

/// A single-subscriber publisher over an operator chain.
///
/// The chain starts running when the subscriber arrives. Later subscribers
/// receive `on_subscribe` followed by `on_error(AlreadySubscribed)`.
pub struct OutletPublisher {
    stream: Mutex<Option<ElementStream>>,
    runtime: Handle,
    lifecycle: Arc<Lifecycle>,
    on_start: Option<StartHook>,
    on_terminate: Option<TerminateHook>,
}

impl OutletPublisher {
    /// Creates a publisher that spawns its driver on `runtime`.
    #[must_use]
    pub fn new(stream: ElementStream, runtime: Handle) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
            runtime,
            lifecycle: Arc::new(Lifecycle::new()),
            on_start: None,
            on_terminate: None,
        }
    }

    /// Sets a callback invoked when the subscriber is accepted.
    #[must_use]
    pub fn with_on_start(mut self, hook: StartHook) -> Self {
        self.on_start = Some(hook);
        self
    }

    /// Sets a callback invoked once the stream ended.
    #[must_use]
    pub fn with_on_terminate(mut self, hook: TerminateHook) -> Self {
        self.on_terminate = Some(hook);
        self
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }
}

impl Publisher<Element> for OutletPublisher {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<Element>>) {
        let Some(stream) = self.stream.lock().take() else {
            debug!("Rejecting second subscriber");
            subscriber.on_subscribe(Arc::new(NoopSubscription));
            subscriber.on_error(StreamError::AlreadySubscribed);
            return;
        };

        self.lifecycle.activate();
        if let Some(hook) = &self.on_start {
            hook();
        }
        let subscription = Arc::new(OutletSubscription::new());
        subscriber.on_subscribe(subscription.clone());

        let lifecycle = self.lifecycle.clone();
        let hook = self.on_terminate.clone();
        self.runtime.spawn(async move {
            let outcome = drive(stream, subscriber, subscription, &lifecycle).await;
            if let Some(hook) = hook {
                hook(&outcome);
            }
        });
    }
}
