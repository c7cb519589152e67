//! Acknowledgeable message envelopes.
//!
//! A message pairs a payload with a deferred acknowledgement action. Messages
//! derived with [`Envelope::with_payload`] keep acknowledging their source, so
//! a chain of transformations stays linked to the original delivery.

mod ack;
mod envelope;

pub use ack::{ack_all, ack_in_order, AckFn, AckFuture};
pub use envelope::{Envelope, MessageExt};

/// A payload with an acknowledgement action.
pub trait Message<T>: Send + Sync {
    /// Returns the payload.
    fn payload(&self) -> &T;

    /// Acknowledges the message.
    ///
    /// Defaults to a no-op that resolves immediately with success. May be
    /// called any number of times; implementations must tolerate repeats.
    fn ack(&self) -> AckFuture {
        ack::acked()
    }
}
