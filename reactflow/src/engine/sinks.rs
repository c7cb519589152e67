//! Terminal stages.
//!
//! A sink consumes the operator chain and resolves with the graph's result.
//! Sinks drop the chain before resolving, so upstream is released by the time
//! the result is observed.

use super::operators::{guard, guarded_future};
use crate::errors::{StreamError, StreamResult};
use crate::graph::{Collector, Element, StageKind};
use crate::reactive::{drive, ElementStream, Lifecycle, OutletSubscription, Outcome, Subscriber};
use futures::future::{BoxFuture, FutureExt};
use futures::StreamExt;
use std::sync::Arc;
use tracing::debug;

/// The running form of a sink.
pub(crate) type SinkFuture = BoxFuture<'static, StreamResult<Element>>;

/// Folds every element with the collector.
pub(crate) fn collect(mut stream: ElementStream, collector: Collector) -> SinkFuture {
    let fold = async move {
        let kind = StageKind::Collect;
        let mut accumulator = guard(kind, || Ok((collector.init)()))?;
        while let Some(next) = stream.next().await {
            let element = next?;
            accumulator = guard(kind, || (collector.accumulate)(accumulator, element))?;
        }
        drop(stream);
        guard(kind, || (collector.finish)(accumulator))
    };
    guarded_future(StageKind::Collect, fold.boxed())
}

/// Resolves with `Option<Element>` holding the first element, and cancels.
pub(crate) fn find_first(mut stream: ElementStream) -> SinkFuture {
    async move {
        let first = stream.next().await;
        drop(stream);
        match first {
            Some(Ok(element)) => Ok(Element::new(Some(element))),
            Some(Err(error)) => Err(error),
            None => Ok(Element::new(None::<Element>)),
        }
    }
    .boxed()
}

/// Cancels upstream without pulling and resolves with a unit element.
pub(crate) fn cancel(stream: ElementStream) -> SinkFuture {
    async move {
        drop(stream);
        debug!("Cancel stage released upstream");
        Ok(Element::unit())
    }
    .boxed()
}

/// Drives the chain into an external subscriber.
///
/// Resolves with a unit element on completion, with the error on failure and
/// with [`StreamError::Cancelled`] if the subscriber cancelled.
pub(crate) fn to_subscriber(stream: ElementStream, subscriber: Arc<dyn Subscriber<Element>>) -> SinkFuture {
    let delivery = async move {
        let subscription = Arc::new(OutletSubscription::new());
        subscriber.on_subscribe(subscription.clone());
        let lifecycle = Lifecycle::new();
        match drive(stream, subscriber, subscription, &lifecycle).await {
            Outcome::Completed => Ok(Element::unit()),
            Outcome::Failed(error) => Err(error),
            Outcome::Cancelled => Err(StreamError::Cancelled),
        }
    };
    guarded_future(StageKind::ToSubscriber, delivery.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestSubscriber;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn ints(values: Vec<i32>) -> ElementStream {
        stream::iter(values.into_iter().map(|v| Ok(Element::new(v)))).boxed()
    }

    fn summing() -> Collector {
        Collector {
            init: Arc::new(|| Element::new(0_i32)),
            accumulate: Arc::new(|acc, element| {
                Ok(Element::new(acc.downcast::<i32>()? + element.downcast::<i32>()?))
            }),
            finish: Arc::new(Ok::<Element, StreamError>),
        }
    }

    #[tokio::test]
    async fn test_collect_folds_in_order() {
        let result = collect(ints(vec![1, 2, 3]), summing()).await.unwrap();
        assert_eq!(result.downcast::<i32>().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_collect_stops_at_error() {
        let failing = ints(vec![1])
            .chain(stream::once(async { Err(StreamError::MissingValue) }))
            .boxed();
        let error = collect(failing, summing()).await.unwrap_err();
        assert!(matches!(error, StreamError::MissingValue));
    }

    #[tokio::test]
    async fn test_collect_catches_panics() {
        let mut collector = summing();
        collector.finish = Arc::new(|_| panic!("finish exploded"));
        let error = collect(ints(vec![1]), collector).await.unwrap_err();
        assert!(matches!(error, StreamError::Panicked { stage: StageKind::Collect, .. }));
    }

    #[tokio::test]
    async fn test_find_first() {
        let found = find_first(ints(vec![4, 5])).await.unwrap();
        let first = found.downcast::<Option<Element>>().unwrap().unwrap();
        assert_eq!(first.downcast::<i32>().unwrap(), 4);

        let empty = find_first(ints(vec![])).await.unwrap();
        assert!(empty.downcast::<Option<Element>>().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_to_subscriber_cancelled() {
        let subscriber = TestSubscriber::<Element>::new();
        let sink = tokio::spawn(to_subscriber(ints(vec![1, 2, 3]), subscriber.clone()));

        subscriber.request(1);
        subscriber.wait_for_items(1, Duration::from_secs(1)).await;
        subscriber.cancel();

        let result = sink.await.unwrap();
        assert!(matches!(result, Err(StreamError::Cancelled)));
        assert_eq!(subscriber.item_count(), 1);
        assert!(!subscriber.is_terminated());
    }
}
