//! Operators shared by the open-ended builders.

use super::{PublisherBuilder, ProcessorBuilder, SubscriberBuilder};
use crate::errors::{StreamError, StreamResult};
use crate::graph::{Collector, Element, Graph, ProcessorFaces, Stage, StageKind};
use crate::reactive::{DowncastingSubscriber, ErasedPublisher, Processor, Publisher, Subscriber};
use futures::future::{self, FutureExt};
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

/// Turns the element a sink resolves with into the runner's result type.
pub(crate) type Convert<X> = fn(Element) -> StreamResult<X>;

pub(crate) fn downcast<X: 'static>(element: Element) -> StreamResult<X> {
    element.downcast()
}

fn first<T: 'static>(element: Element) -> StreamResult<Option<T>> {
    element
        .downcast::<Option<Element>>()?
        .map(Element::downcast)
        .transpose()
}

fn single(stage: Stage) -> Graph {
    Graph::new(vec![stage])
}

/// Splits a typed processor into the two element faces a graph stage holds.
pub(crate) fn faces<T, R, P>(processor: Arc<P>) -> ProcessorFaces
where
    T: Send + 'static,
    R: Send + 'static,
    P: Processor<T, R> + 'static,
{
    let subscriber: Arc<dyn Subscriber<T>> = processor.clone();
    let publisher: Arc<dyn Publisher<R>> = processor;
    ProcessorFaces {
        subscriber: Arc::new(DowncastingSubscriber::new(subscriber)),
        publisher: Arc::new(ErasedPublisher::new(publisher)),
    }
}

/// Stages available on any builder with an open outlet emitting `T`.
///
/// Appending an operator yields [`Open`](Self::Open), another open-ended
/// builder; appending a sink yields [`Closed`](Self::Closed). Builders are
/// values: every call returns a new builder and the receiver's graph is shared,
/// never modified.
pub trait StreamOps<T: Send + 'static>: Sized {
    /// The builder produced by appending an operator emitting `R`.
    type Open<R: Send + 'static>;

    /// The builder produced by appending a sink resolving with `X`.
    type Closed<X: Send + 'static>;

    #[doc(hidden)]
    fn append<R: Send + 'static>(self, stages: &Graph) -> Self::Open<R>;

    #[doc(hidden)]
    fn close<X: Send + 'static>(self, stages: &Graph, convert: Convert<X>) -> Self::Closed<X>;

    /// Transforms each element.
    fn map<R, F>(self, f: F) -> Self::Open<R>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.append(&single(Stage::Map(Arc::new(move |element| {
            Ok(Element::new(f(element.downcast::<T>()?)))
        }))))
    }

    /// Transforms each element; an `Err` becomes the terminal error.
    fn try_map<R, E, F>(self, f: F) -> Self::Open<R>
    where
        R: Send + 'static,
        E: Into<anyhow::Error>,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        self.append(&single(Stage::Map(Arc::new(move |element| {
            f(element.downcast::<T>()?)
                .map(Element::new)
                .map_err(|e| StreamError::stage(StageKind::Map, e))
        }))))
    }

    /// Keeps elements matching the predicate.
    fn filter<F>(self, predicate: F) -> Self::Open<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.append(&single(Stage::Filter(Arc::new(move |element| {
            Ok(predicate(element.try_downcast_ref::<T>()?))
        }))))
    }

    /// Observes each element.
    fn peek<F>(self, f: F) -> Self::Open<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.append(&single(Stage::Peek(Arc::new(move |element| {
            f(element.try_downcast_ref::<T>()?);
            Ok(())
        }))))
    }

    /// Replaces each element by the stream of a publisher builder. Sub-streams
    /// are drained one at a time, in order.
    fn flat_map<R, F>(self, f: F) -> Self::Open<R>
    where
        R: Send + 'static,
        F: Fn(T) -> PublisherBuilder<R> + Send + Sync + 'static,
    {
        self.append(&single(Stage::FlatMap(Arc::new(move |element| {
            Ok(f(element.downcast::<T>()?).into_graph())
        }))))
    }

    /// Replaces each element by the value of a future, one future at a time.
    fn flat_map_future<R, Fut, F>(self, f: F) -> Self::Open<R>
    where
        R: Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
    {
        self.append(&single(Stage::FlatMapFuture(Arc::new(move |element| {
            match element.downcast::<T>() {
                Ok(value) => f(value).map(|r| Ok(Element::new(r))).boxed(),
                Err(error) => future::ready(Err(error)).boxed(),
            }
        }))))
    }

    /// Replaces each element by zero or more elements.
    fn flat_map_iter<R, I, F>(self, f: F) -> Self::Open<R>
    where
        R: Send + 'static,
        I: IntoIterator<Item = R>,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        self.append(&single(Stage::FlatMapIterable(Arc::new(move |element| {
            Ok(f(element.downcast::<T>()?).into_iter().map(Element::new).collect())
        }))))
    }

    /// Emits elements while the predicate holds, then completes.
    fn take_while<F>(self, predicate: F) -> Self::Open<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.append(&single(Stage::TakeWhile(Arc::new(move |element| {
            Ok(predicate(element.try_downcast_ref::<T>()?))
        }))))
    }

    /// Drops elements while the predicate holds.
    fn drop_while<F>(self, predicate: F) -> Self::Open<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.append(&single(Stage::DropWhile(Arc::new(move |element| {
            Ok(predicate(element.try_downcast_ref::<T>()?))
        }))))
    }

    /// Drops the first `n` elements.
    fn skip(self, n: u64) -> Self::Open<T> {
        self.append(&single(Stage::Skip(n)))
    }

    /// Emits at most `n` elements, then cancels upstream.
    fn limit(self, n: u64) -> Self::Open<T> {
        self.append(&single(Stage::Limit(n)))
    }

    /// Drops elements equal to an earlier one.
    fn distinct(self) -> Self::Open<T>
    where
        T: Eq + Hash + Clone,
    {
        self.append(&single(Stage::Distinct(Arc::new(|| {
            let mut seen = HashSet::<T>::new();
            let accept: Box<dyn FnMut(&Element) -> StreamResult<bool> + Send> =
                Box::new(move |element| Ok(seen.insert(element.try_downcast_ref::<T>()?.clone())));
            accept
        }))))
    }

    /// Observes a terminal error.
    fn on_error<F>(self, f: F) -> Self::Open<T>
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.append(&single(Stage::OnError(Arc::new(f))))
    }

    /// Observes normal completion.
    fn on_complete<F>(self, f: F) -> Self::Open<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.append(&single(Stage::OnComplete(Arc::new(f))))
    }

    /// Observes completion, failure or cancellation.
    fn on_terminate<F>(self, f: F) -> Self::Open<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.append(&single(Stage::OnTerminate(Arc::new(f))))
    }

    /// Replaces a terminal error by one last element.
    fn on_error_resume<F>(self, f: F) -> Self::Open<T>
    where
        F: Fn(StreamError) -> T + Send + Sync + 'static,
    {
        self.append(&single(Stage::OnErrorResume(Arc::new(move |error| {
            Ok(Element::new(f(error)))
        }))))
    }

    /// Replaces a terminal error by the stream of a publisher builder.
    fn on_error_resume_with<F>(self, f: F) -> Self::Open<T>
    where
        F: Fn(StreamError) -> PublisherBuilder<T> + Send + Sync + 'static,
    {
        self.append(&single(Stage::OnErrorResumeWith(Arc::new(move |error| {
            Ok(f(error).into_graph())
        }))))
    }

    /// Appends the stages of a processor builder.
    fn via<R: Send + 'static>(self, processor: ProcessorBuilder<T, R>) -> Self::Open<R> {
        self.append(processor.graph())
    }

    /// Routes elements through an external processor.
    fn via_processor<R, P>(self, processor: Arc<P>) -> Self::Open<R>
    where
        R: Send + 'static,
        P: Processor<T, R> + 'static,
    {
        self.append(&single(Stage::Processor(faces(processor))))
    }

    /// Ends with the stages of a subscriber builder.
    fn to<X: Send + 'static>(self, subscriber: SubscriberBuilder<T, X>) -> Self::Closed<X> {
        let convert = subscriber.convert();
        self.close(subscriber.graph(), convert)
    }

    /// Ends by delivering elements to an external subscriber.
    fn to_subscriber(self, subscriber: Arc<dyn Subscriber<T>>) -> Self::Closed<()> {
        let stage = Stage::ToSubscriber(Arc::new(DowncastingSubscriber::new(subscriber)));
        self.close(&single(stage), downcast::<()>)
    }

    /// Folds every element into an accumulator.
    fn collect<A, I, F>(self, init: I, accumulate: F) -> Self::Closed<A>
    where
        A: Send + 'static,
        I: Fn() -> A + Send + Sync + 'static,
        F: Fn(A, T) -> A + Send + Sync + 'static,
    {
        let collector = Collector {
            init: Arc::new(move || Element::new(init())),
            accumulate: Arc::new(move |acc, element| {
                Ok(Element::new(accumulate(acc.downcast::<A>()?, element.downcast::<T>()?)))
            }),
            finish: Arc::new(Ok::<Element, StreamError>),
        };
        self.close(&single(Stage::Collect(collector)), downcast::<A>)
    }

    /// Collects every element into a vector, in order.
    fn to_list(self) -> Self::Closed<Vec<T>> {
        self.collect(Vec::new, |mut items: Vec<T>, item| {
            items.push(item);
            items
        })
    }

    /// Folds every element with `f`, starting from `identity`.
    fn reduce<F>(self, identity: T, f: F) -> Self::Closed<T>
    where
        T: Clone + Sync,
        F: Fn(T, T) -> T + Send + Sync + 'static,
    {
        self.collect(move || identity.clone(), f)
    }

    /// Runs `f` for each element.
    fn for_each<F>(self, f: F) -> Self::Closed<()>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.collect(|| (), move |(), item| f(item))
    }

    /// Drains every element, discarding them.
    fn ignore(self) -> Self::Closed<()> {
        self.for_each(drop)
    }

    /// Resolves with the first element, if any, and cancels upstream.
    fn find_first(self) -> Self::Closed<Option<T>> {
        self.close(&single(Stage::FindFirst), first::<T>)
    }

    /// Cancels upstream immediately.
    fn cancel(self) -> Self::Closed<()> {
        self.close(&single(Stage::Cancel), downcast::<()>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_first_unwraps_nested_element() {
        let found = Element::new(Some(Element::new(7_u8)));
        assert_eq!(first::<u8>(found).unwrap(), Some(7));
        assert_eq!(first::<u8>(Element::new(None::<Element>)).unwrap(), None);
    }

    #[test]
    fn test_first_reports_inner_mismatch() {
        let found = Element::new(Some(Element::new("x")));
        assert!(matches!(first::<u8>(found), Err(StreamError::TypeMismatch { .. })));
    }
}
