//! Reactive-streams protocol and the bridges the engine runs on.
//!
//! This module provides:
//! - The [`Publisher`], [`Subscriber`], [`Subscription`] and [`Processor`] traits
//! - [`Demand`] accounting and the per-artifact [`Lifecycle`] state machine
//! - [`CancelSignal`] for cooperative cancellation
//! - [`Inlet`], which turns subscriber callbacks into a pull-based stream with
//!   bounded prefetch
//! - [`OutletPublisher`], which drives a stream into one subscriber, never
//!   emitting more than the subscriber requested
//! - Typed adapters translating between [`Element`] and concrete types

mod demand;
mod guard;
mod inlet;
mod lifecycle;
mod outlet;
mod signal;
mod typed;

pub use demand::Demand;
pub(crate) use guard::{guard, panicked};
pub use inlet::{Inlet, InletStream, InletSubscriber};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use outlet::{drive, OutletPublisher, OutletSubscription, Outcome, StartHook, TerminateHook};
pub use signal::CancelSignal;
pub use typed::{DowncastingSubscriber, ErasedPublisher, TypedProcessor, TypedPublisher, TypedSubscriber};

use crate::errors::{StreamError, StreamResult};
use crate::graph::Element;
use futures::stream::BoxStream;
use std::sync::Arc;

/// A boxed stream of elements where an `Err` item is terminal.
pub type ElementStream = BoxStream<'static, StreamResult<Element>>;

/// A link between one publisher and one subscriber.
pub trait Subscription: Send + Sync {
    /// Adds `n` to the outstanding demand. `n == 0` is a protocol violation.
    fn request(&self, n: u64);

    /// Stops the flow of elements. Idempotent.
    fn cancel(&self);

    /// Cancels because the subscriber itself failed with `error`.
    ///
    /// Publishers that report how a run ended may record `error` as the
    /// outcome instead of a plain cancellation. The default only cancels.
    fn fail(&self, error: StreamError) {
        drop(error);
        self.cancel();
    }
}

/// A consumer of signals.
///
/// A publisher delivers `on_subscribe` first, then any number of `on_next`
/// bounded by the requested demand, then at most one of `on_error` or
/// `on_complete`. Signals to one subscriber never overlap in time.
pub trait Subscriber<T>: Send + Sync {
    /// Receives the subscription.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);

    /// Receives an element.
    fn on_next(&self, item: T);

    /// Receives the terminal error.
    fn on_error(&self, error: StreamError);

    /// Receives normal completion.
    fn on_complete(&self);
}

/// A producer of elements.
pub trait Publisher<T>: Send + Sync {
    /// Attaches a subscriber.
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// Both a subscriber and a publisher.
pub trait Processor<T, R>: Subscriber<T> + Publisher<R> {}

impl<T, R, P> Processor<T, R> for P where P: Subscriber<T> + Publisher<R> {}

/// A subscription that ignores every signal.
///
/// Handed to subscribers that are rejected right after `on_subscribe`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSubscription;

impl Subscription for NoopSubscription {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {}
}
