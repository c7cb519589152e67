//! Acknowledgement futures and their composition.

use super::Message;
use crate::errors::AckError;
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::debug;

/// The deferred result of an acknowledgement.
pub type AckFuture = BoxFuture<'static, Result<(), AckError>>;

/// An acknowledgement action, invoked afresh on every `ack()` call.
pub type AckFn = Arc<dyn Fn() -> AckFuture + Send + Sync>;

/// Returns an already successful acknowledgement.
pub(crate) fn acked() -> AckFuture {
    future::ready(Ok(())).boxed()
}

/// Acknowledges every message concurrently.
///
/// Resolves once all acknowledgements succeeded, or with the first failure.
pub async fn ack_all<'a, T, M>(messages: impl IntoIterator<Item = &'a M>) -> Result<(), AckError>
where
    M: Message<T> + ?Sized + 'a,
{
    let acks: Vec<AckFuture> = messages.into_iter().map(|m| m.ack()).collect();
    debug!(count = acks.len(), "Acknowledging messages");
    future::try_join_all(acks).await.map(|_| ())
}

/// Acknowledges messages one after another, each only after the previous one
/// succeeded.
///
/// Stops at the first failure; later messages are not acknowledged.
pub async fn ack_in_order<'a, T, M>(
    messages: impl IntoIterator<Item = &'a M>,
) -> Result<(), AckError>
where
    M: Message<T> + ?Sized + 'a,
{
    for message in messages {
        message.ack().await?;
    }
    Ok(())
}
