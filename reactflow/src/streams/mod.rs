//! Typed fluent builders over stage graphs.
//!
//! The free functions here start a graph; the [`StreamOps`] trait extends it.
//! Builders only describe work. Nothing runs until a builder is handed to an
//! [`Engine`](crate::engine::Engine), and one builder can be built any number
//! of times.
//!
//! ```rust,ignore
//! use reactflow::prelude::*;
//!
//! let engine = StreamEngine::new();
//! let doubled = streams::of(vec![1, 2, 3])
//!     .map(|n| n * 2)
//!     .to_list()
//!     .run(&engine)?
//!     .await?;
//! assert_eq!(doubled, vec![2, 4, 6]);
//! ```

mod ops;
mod processor;
mod publisher;
mod subscriber;

pub use ops::StreamOps;
pub use processor::ProcessorBuilder;
pub use publisher::PublisherBuilder;
pub use subscriber::{CompletionRunner, SubscriberBuilder};

use crate::errors::StreamError;
use crate::graph::{Element, Graph, Stage};
use crate::reactive::{DowncastingSubscriber, ErasedPublisher, Processor, Publisher, Subscriber};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

fn source<T>(stage: Stage) -> PublisherBuilder<T> {
    PublisherBuilder::from_graph(Graph::new(vec![stage]))
}

/// Emits the items, in order, each time the graph is built.
pub fn of<T>(items: impl IntoIterator<Item = T>) -> PublisherBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    let items: Vec<T> = items.into_iter().collect();
    from_iter(move || items.clone())
}

/// Emits the items of a fresh iterable per build.
pub fn from_iter<T, I, F>(factory: F) -> PublisherBuilder<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    F: Fn() -> I + Send + Sync + 'static,
{
    source(Stage::Of(Arc::new(move || {
        let elements: Box<dyn Iterator<Item = Element> + Send> = Box::new(factory().into_iter().map(Element::new));
        elements
    })))
}

/// Completes without emitting.
pub fn empty<T>() -> PublisherBuilder<T> {
    source(Stage::Of(Arc::new(|| {
        let elements: Box<dyn Iterator<Item = Element> + Send> = Box::new(std::iter::empty());
        elements
    })))
}

/// Fails immediately with the error.
pub fn failed<T>(error: StreamError) -> PublisherBuilder<T> {
    source(Stage::Failed(error))
}

/// Emits what an external publisher emits.
///
/// The publisher is subscribed once per build; it decides whether it accepts
/// more than one subscriber.
pub fn from_publisher<T: Send + 'static>(publisher: Arc<dyn Publisher<T>>) -> PublisherBuilder<T> {
    source(Stage::FromPublisher(Arc::new(ErasedPublisher::new(publisher))))
}

/// Emits everything from `first`, then everything from `second`.
///
/// `second` is only subscribed once `first` completed. If the stream is
/// cancelled first, `second` is subscribed and cancelled right away.
pub fn concat<T>(first: PublisherBuilder<T>, second: PublisherBuilder<T>) -> PublisherBuilder<T> {
    source(Stage::Concat(first.into_graph(), second.into_graph()))
}

/// Emits the value of a fresh future per build.
pub fn from_future<T, Fut, F>(factory: F) -> PublisherBuilder<T>
where
    T: Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
{
    source(Stage::FromFuture {
        future: Arc::new(move || factory().map(|value| Ok(Some(Element::new(value)))).boxed()),
        nullable: false,
    })
}

/// Emits the value of a fresh fallible future per build; an `Err` becomes
/// the terminal error.
pub fn try_from_future<T, E, Fut, F>(factory: F) -> PublisherBuilder<T>
where
    T: Send + 'static,
    E: Into<anyhow::Error>,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
{
    source(Stage::FromFuture {
        future: Arc::new(move || {
            factory()
                .map(|result| {
                    result
                        .map(|value| Some(Element::new(value)))
                        .map_err(StreamError::upstream)
                })
                .boxed()
        }),
        nullable: false,
    })
}

/// Emits the value of a fresh future per build; `None` completes empty.
pub fn from_future_nullable<T, Fut, F>(factory: F) -> PublisherBuilder<T>
where
    T: Send + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
{
    source(Stage::FromFuture {
        future: Arc::new(move || factory().map(|value| Ok(value.map(Element::new))).boxed()),
        nullable: true,
    })
}

/// Starts an identity processor.
pub fn builder<T>() -> ProcessorBuilder<T, T> {
    ProcessorBuilder::from_graph(Graph::empty())
}

/// Starts a processor from an external processor.
pub fn from_processor<T, R, P>(processor: Arc<P>) -> ProcessorBuilder<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
    P: Processor<T, R> + 'static,
{
    ProcessorBuilder::from_graph(Graph::new(vec![Stage::Processor(ops::faces(processor))]))
}

/// Starts a subscriber builder delivering to an external subscriber.
pub fn from_subscriber<T: Send + 'static>(subscriber: Arc<dyn Subscriber<T>>) -> SubscriberBuilder<T, ()> {
    SubscriberBuilder::from_graph(
        Graph::new(vec![Stage::ToSubscriber(Arc::new(DowncastingSubscriber::new(subscriber)))]),
        ops::downcast::<()>,
    )
}

/// Couples a subscriber and a publisher into one processor.
///
/// Elements received go to `subscriber`; elements emitted come from
/// `publisher`. Termination is linked both ways: when one side terminates the
/// other side is completed or cancelled.
pub fn coupled<T, X, R>(subscriber: SubscriberBuilder<T, X>, publisher: PublisherBuilder<R>) -> ProcessorBuilder<T, R> {
    ProcessorBuilder::from_graph(Graph::new(vec![Stage::Coupled {
        subscriber: subscriber.into_graph(),
        publisher: publisher.into_graph(),
    }]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StreamEngine;
    use crate::errors::EngineError;
    use crate::graph::{Shape, StageKind};
    use crate::testing::{ManualPublisher, TestSubscriber};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_of_map_to_list() {
        let engine = StreamEngine::new();
        let result = of(vec![1, 2, 3]).map(|n| n * 10).to_list().run(&engine).unwrap().await;
        assert_eq!(result.unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_builder_shapes() {
        assert_eq!(of(vec![1]).graph().shape(), Shape::Publisher);
        assert_eq!(builder::<i32>().map(|n| n + 1).graph().shape(), Shape::Processor);
        assert_eq!(builder::<i32>().to_list().graph().shape(), Shape::Subscriber);
        assert_eq!(of(vec![1]).cancel().graph().shape(), Shape::Completion);
    }

    #[tokio::test]
    async fn test_builders_share_prefix_without_mutation() {
        let engine = StreamEngine::new();
        let base = of(vec![1, 2, 3, 4]);
        let evens = base.clone().filter(|n| n % 2 == 0).to_list();
        let all = base.to_list();

        assert_eq!(evens.run(&engine).unwrap().await.unwrap(), vec![2, 4]);
        assert_eq!(all.run(&engine).unwrap().await.unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_try_map_error_names_stage() {
        let engine = StreamEngine::new();
        let result = of(vec![1, 2, 3])
            .try_map(|n| if n == 2 { Err(anyhow::anyhow!("two")) } else { Ok(n) })
            .to_list()
            .run(&engine)
            .unwrap()
            .await;
        assert!(matches!(result, Err(StreamError::Stage { stage: StageKind::Map, .. })));
    }

    #[tokio::test]
    async fn test_operator_chain() {
        let engine = StreamEngine::new();
        let result = of(vec![5, 1, 1, 2, 3, 2, 8, 9])
            .drop_while(|n| *n > 4)
            .distinct()
            .take_while(|n| *n < 8)
            .skip(1)
            .limit(5)
            .flat_map_iter(|n| vec![n, n * 100])
            .to_list()
            .run(&engine)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, vec![2, 200, 3, 300]);
    }

    #[tokio::test]
    async fn test_flat_map_drains_in_order() {
        let engine = StreamEngine::new();
        let result = of(vec![1, 2])
            .flat_map(|n| of(vec![n, n]))
            .flat_map_future(|n| async move { n + 1 })
            .to_list()
            .run(&engine)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result, vec![2, 2, 3, 3]);
    }

    #[tokio::test]
    async fn test_reduce_and_find_first() {
        let engine = StreamEngine::new();
        let sum = of(vec![1, 2, 3]).reduce(0, |a, b| a + b).run(&engine).unwrap().await;
        assert_eq!(sum.unwrap(), 6);

        let first = of(vec!["a", "b"]).find_first().run(&engine).unwrap().await;
        assert_eq!(first.unwrap(), Some("a"));

        let none = empty::<u8>().find_first().run(&engine).unwrap().await;
        assert_eq!(none.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concat_and_resume() {
        let engine = StreamEngine::new();
        let result = concat(of(vec![1, 2]), failed(StreamError::MissingValue))
            .on_error_resume(|_| -1)
            .to_list()
            .run(&engine)
            .unwrap()
            .await;
        assert_eq!(result.unwrap(), vec![1, 2, -1]);

        let resumed = failed::<i32>(StreamError::MissingValue)
            .on_error_resume_with(|_| of(vec![7, 8]))
            .to_list()
            .run(&engine)
            .unwrap()
            .await;
        assert_eq!(resumed.unwrap(), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_futures() {
        let engine = StreamEngine::new();
        let value = from_future(|| async { 4_u8 }).to_list().run(&engine).unwrap().await;
        assert_eq!(value.unwrap(), vec![4]);

        let nothing = from_future_nullable(|| async { None::<u8> }).to_list().run(&engine).unwrap().await;
        assert_eq!(nothing.unwrap(), Vec::<u8>::new());

        let failing = try_from_future(|| async { Err::<u8, _>(anyhow::anyhow!("down")) })
            .to_list()
            .run(&engine)
            .unwrap()
            .await;
        assert!(matches!(failing, Err(StreamError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_callbacks() {
        let engine = StreamEngine::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let terminated = Arc::new(AtomicUsize::new(0));

        let (s, c, t) = (seen.clone(), completed.clone(), terminated.clone());
        of(vec![1, 2, 3])
            .peek(move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            })
            .on_complete(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_terminate(move || {
                t.fetch_add(1, Ordering::SeqCst);
            })
            .ignore()
            .run(&engine)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_terminate_skipped_for_unsubscribed_publisher() {
        let engine = StreamEngine::new();
        let terminated = Arc::new(AtomicUsize::new(0));
        let t = terminated.clone();
        let pipeline = of(vec![1, 2, 3]).on_terminate(move || {
            t.fetch_add(1, Ordering::SeqCst);
        });

        drop(pipeline.build(&engine).unwrap());
        assert_eq!(terminated.load(Ordering::SeqCst), 0);

        let publisher = pipeline.build(&engine).unwrap();
        let subscriber = TestSubscriber::<i32>::new();
        publisher.subscribe(subscriber.clone());
        subscriber.request(1);
        subscriber.wait_for_items(1, WAIT).await;
        subscriber.cancel();
        tokio::time::timeout(WAIT, async {
            while terminated.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_built_publisher_respects_demand() {
        let engine = StreamEngine::new();
        let publisher = of(vec![1, 2, 3]).build(&engine).unwrap();
        let subscriber = TestSubscriber::<i32>::new();
        publisher.subscribe(subscriber.clone());

        subscriber.request(2);
        subscriber.wait_for_items(2, WAIT).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(subscriber.items(), vec![1, 2]);
        assert!(!subscriber.is_terminated());

        subscriber.request(5);
        subscriber.await_terminal(WAIT).await;
        assert_eq!(subscriber.items(), vec![1, 2, 3]);
        assert!(subscriber.is_completed());
    }

    #[tokio::test]
    async fn test_subscriber_builder() {
        let engine = StreamEngine::new();
        let (subscriber, completion) = builder::<i32>()
            .map(|n| n.to_string())
            .to_list()
            .build(&engine)
            .unwrap();

        let upstream = ManualPublisher::<i32>::new();
        upstream.subscribe(subscriber);
        upstream.wait_for_request(2, WAIT).await;
        upstream.emit(1);
        upstream.emit(2);
        upstream.complete();

        assert_eq!(completion.await.unwrap(), vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_processor_builder() {
        let engine = StreamEngine::new();
        let processor = Arc::new(builder::<i32>().map(|n| n * 2).build(&engine).unwrap());

        let result = of(vec![1, 2, 3])
            .via_processor(processor)
            .to_list()
            .run(&engine)
            .unwrap()
            .await;
        assert_eq!(result.unwrap(), vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn test_via_and_to_compose_graphs() {
        let engine = StreamEngine::new();
        let double = builder::<i32>().map(|n| n * 2);
        let sink = builder::<i32>().filter(|n| *n > 2).to_list();

        let result = of(vec![1, 2, 3]).via(double).to(sink).run(&engine).unwrap().await;
        assert_eq!(result.unwrap(), vec![4, 6]);
    }

    #[tokio::test]
    async fn test_to_subscriber_delivers_typed() {
        let engine = StreamEngine::new();
        let subscriber = TestSubscriber::<String>::requesting(10);
        let done = of(vec!["x".to_string()])
            .to_subscriber(subscriber.clone())
            .run(&engine)
            .unwrap()
            .await;

        assert!(done.is_ok());
        assert_eq!(subscriber.items(), vec!["x".to_string()]);
        assert!(subscriber.is_completed());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_terminal() {
        let engine = StreamEngine::new();
        let wrong: PublisherBuilder<u32> = PublisherBuilder::from_graph(of(vec![1_i64]).into_graph());
        let result = wrong.to_list().run(&engine).unwrap().await;
        assert!(matches!(result, Err(StreamError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_coupled_completion_cancels_upstream() {
        let engine = StreamEngine::new();
        let upstream = ManualPublisher::<i32>::new();

        let result = from_publisher(upstream.clone() as Arc<dyn Publisher<i32>>)
            .via(coupled(builder::<i32>().ignore(), of(vec!["done"])))
            .to_list()
            .run(&engine)
            .unwrap();

        assert_eq!(result.await.unwrap(), vec!["done"]);
        upstream.wait_for_cancel(WAIT).await;
        assert_eq!(upstream.subscribe_count(), 1);
    }

    #[test]
    fn test_unsupported_stage_rejected_by_builders() {
        let engine = StreamEngine::builder().without_stage(StageKind::Distinct).build();
        let error = of(vec![1]).distinct().to_list().run(&engine).unwrap_err();
        assert!(matches!(error, EngineError::UnsupportedStage(ref e) if e.kind == StageKind::Distinct));
    }
}
