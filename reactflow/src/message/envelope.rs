//! The concrete message envelope.

use super::ack::{acked, AckFn, AckFuture};
use super::Message;
use crate::errors::AckError;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A payload with an optional acknowledgement action.
///
/// Envelopes derived with [`with_payload`](Self::with_payload) or
/// [`map_payload`](Self::map_payload) share the ack action of their source:
/// acknowledging any of them runs the original action.
pub struct Envelope<T> {
    payload: T,
    ack: Option<AckFn>,
}

impl<T> Envelope<T> {
    /// Creates a message whose ack always succeeds immediately.
    pub fn new(payload: T) -> Self {
        Self { payload, ack: None }
    }

    /// Creates a message whose ack invokes `ack` afresh on every call.
    pub fn ackable<F, Fut>(payload: T, ack: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AckError>> + Send + 'static,
    {
        Self::with_ack_fn(payload, Arc::new(move || ack().boxed()))
    }

    /// Creates a message from an existing ack action.
    pub fn with_ack_fn(payload: T, ack: AckFn) -> Self {
        Self {
            payload,
            ack: Some(ack),
        }
    }

    /// Returns a new message carrying `payload` and acknowledging through this
    /// message's ack action.
    pub fn with_payload<R>(&self, payload: R) -> Envelope<R> {
        Envelope {
            payload,
            ack: self.ack.clone(),
        }
    }

    /// Transforms the payload, keeping the ack action.
    pub fn map_payload<R>(self, f: impl FnOnce(T) -> R) -> Envelope<R> {
        Envelope {
            payload: f(self.payload),
            ack: self.ack,
        }
    }

    /// Returns true if acknowledging runs a custom action.
    #[must_use]
    pub fn has_custom_ack(&self) -> bool {
        self.ack.is_some()
    }

    /// Discards the ack action and returns the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Send + Sync> Message<T> for Envelope<T> {
    fn payload(&self) -> &T {
        &self.payload
    }

    fn ack(&self) -> AckFuture {
        match &self.ack {
            Some(ack) => ack(),
            None => acked(),
        }
    }
}

impl<T: Clone> Clone for Envelope<T> {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            ack: self.ack.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Envelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("payload", &self.payload)
            .field("custom_ack", &self.ack.is_some())
            .finish()
    }
}

/// Payload derivation for any shared message implementation.
pub trait MessageExt<T>: Message<T> {
    /// Returns a new envelope carrying `payload` whose ack delegates to this
    /// message's ack.
    fn with_payload<R>(self: &Arc<Self>, payload: R) -> Envelope<R>
    where
        Self: 'static;
}

impl<T, M> MessageExt<T> for M
where
    M: Message<T> + ?Sized,
{
    fn with_payload<R>(self: &Arc<Self>, payload: R) -> Envelope<R>
    where
        Self: 'static,
    {
        let source = Arc::clone(self);
        Envelope::with_ack_fn(payload, Arc::new(move || source.ack()))
    }
}
