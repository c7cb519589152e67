//! Engine-agnostic behaviour checks, run against the public API only.
//!
//! Each check takes a `&dyn Engine`, so an alternative engine can be
//! verified by calling the same functions.

use pretty_assertions::assert_eq;
use reactflow::message::ack_all;
use reactflow::prelude::*;
use reactflow::testing::{AckProbe, ManualPublisher, Signal, TestSubscriber};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

async fn check_emits_in_order(engine: &dyn Engine) {
    let result = streams::of(vec![1, 2, 3]).to_list().run(engine).unwrap().await.unwrap();
    assert_eq!(result, vec![1, 2, 3]);
}

async fn check_graph_reuse(engine: &dyn Engine) {
    let pipeline = streams::of(vec![1, 2, 3]).map(|n| n * 10).to_list();

    let first = pipeline.run(engine).unwrap().await.unwrap();
    let second = pipeline.run(engine).unwrap().await.unwrap();

    assert_eq!(first, vec![10, 20, 30]);
    assert_eq!(first, second);
}

async fn check_cancel_after_first(engine: &dyn Engine) {
    let publisher = streams::of(vec![1, 2, 3]).build(engine).unwrap();
    let subscriber = TestSubscriber::<i32>::new();
    publisher.subscribe(subscriber.clone());

    subscriber.request(1);
    subscriber.wait_for_items(1, WAIT).await;
    subscriber.cancel();
    subscriber.request(5);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(subscriber.items(), vec![1]);
    assert_eq!(subscriber.signals(), vec![Signal::Subscribe, Signal::Next]);
    assert_eq!(subscriber.violations(), 0);
}

async fn check_map_failure(engine: &dyn Engine) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let pipeline = streams::of(vec![1, 2, 3])
        .try_map(move |n: i32| {
            counter.fetch_add(1, Ordering::SeqCst);
            if n == 2 {
                Err(anyhow::anyhow!("boom"))
            } else {
                Ok(n)
            }
        })
        .to_list();

    let err = pipeline.run(engine).unwrap().await.unwrap_err();
    assert!(matches!(err, StreamError::Stage { stage: StageKind::Map, .. }));
    assert!(err.to_string().contains("boom"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

async fn check_demand_honoured(engine: &dyn Engine) {
    let publisher = streams::from_iter(|| 0_u32..100).filter(|n| n % 2 == 0).build(engine).unwrap();
    let subscriber = TestSubscriber::<u32>::new();
    publisher.subscribe(subscriber.clone());

    subscriber.request(3);
    subscriber.wait_for_items(3, WAIT).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(subscriber.items(), vec![0, 2, 4]);
    assert!(!subscriber.is_terminated());

    subscriber.request(u64::MAX);
    subscriber.await_terminal(WAIT).await;
    assert!(subscriber.is_completed());
    assert_eq!(subscriber.item_count(), 50);
    assert_eq!(subscriber.violations(), 0);
}

async fn check_unbounded_demand_then_cancel(engine: &dyn Engine) {
    let publisher = streams::from_iter(|| 0_u64..).build(engine).unwrap();
    let subscriber = TestSubscriber::<u64>::new();
    publisher.subscribe(subscriber.clone());

    subscriber.request(u64::MAX);
    subscriber.wait_for_items(1000, WAIT).await;
    subscriber.cancel();

    tokio::time::sleep(Duration::from_millis(10)).await;
    let settled = subscriber.item_count();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(subscriber.item_count(), settled);
    assert!(!subscriber.is_terminated());

    let items = subscriber.items();
    let expected: Vec<u64> = (0..items.len() as u64).collect();
    assert_eq!(items, expected);
    assert_eq!(subscriber.violations(), 0);
}

async fn check_processor_relays(engine: &dyn Engine) {
    let processor = streams::builder::<i32>().map(|n| n + 1).build(engine).unwrap();
    let upstream = ManualPublisher::<i32>::new();
    let downstream = TestSubscriber::<i32>::requesting(10);

    processor.subscribe(downstream.clone());
    upstream.subscribe(Arc::new(processor));
    upstream.wait_for_request(1, WAIT).await;

    upstream.emit(1);
    upstream.emit(2);
    upstream.complete();
    downstream.await_terminal(WAIT).await;

    assert_eq!(downstream.items(), vec![2, 3]);
    assert!(downstream.is_completed());
}

async fn check_subscriber_artifact(engine: &dyn Engine) {
    let (subscriber, completion) = streams::builder::<i32>()
        .filter(|n| *n > 1)
        .to_list()
        .build(engine)
        .unwrap();
    let upstream = ManualPublisher::<i32>::new();
    upstream.subscribe(subscriber);
    upstream.wait_for_request(1, WAIT).await;

    for n in 0..4 {
        upstream.emit(n);
    }
    upstream.complete();

    assert_eq!(completion.await.unwrap(), vec![2, 3]);
}

async fn run_all(engine: &dyn Engine) {
    check_emits_in_order(engine).await;
    check_graph_reuse(engine).await;
    check_cancel_after_first(engine).await;
    check_map_failure(engine).await;
    check_demand_honoured(engine).await;
    check_unbounded_demand_then_cancel(engine).await;
    check_processor_relays(engine).await;
    check_subscriber_artifact(engine).await;
}

#[tokio::test]
async fn test_stream_engine_passes_harness() {
    run_all(&StreamEngine::new()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stream_engine_passes_harness_multi_thread() {
    run_all(&StreamEngine::new()).await;
}

#[tokio::test]
async fn test_restricted_engine_rejects_every_build() {
    let engine = StreamEngine::builder().without_stage(StageKind::Distinct).build();
    assert!(!engine.supports(StageKind::Distinct));

    let source = streams::of(vec![1, 1, 2]).distinct();
    let Err(err) = source.build(&engine) else {
        panic!("distinct should be rejected");
    };
    assert!(matches!(err, EngineError::UnsupportedStage(_)));
    assert!(source.clone().to_list().run(&engine).is_err());
    assert!(streams::builder::<i32>().distinct().build(&engine).is_err());
    assert!(streams::builder::<i32>().distinct().to_list().build(&engine).is_err());

    // The unrestricted engine still runs the same description.
    let result = source.to_list().run(&StreamEngine::new()).unwrap().await.unwrap();
    assert_eq!(result, vec![1, 2]);
}

#[tokio::test]
async fn test_envelope_acks_through_pipeline() {
    let probe = AckProbe::new();
    let inputs: Vec<Envelope<i32>> = (1..=3).map(|n| Envelope::ackable(n, probe.supplier())).collect();

    let outputs = streams::of(inputs)
        .map(|message| message.map_payload(|n| format!("#{n}")))
        .to_list()
        .run(&StreamEngine::new())
        .unwrap()
        .await
        .unwrap();

    let payloads: Vec<&str> = outputs.iter().map(|m| m.payload().as_str()).collect();
    assert_eq!(payloads, vec!["#1", "#2", "#3"]);
    assert_eq!(probe.count(), 0);

    ack_all(outputs.iter()).await.unwrap();
    assert_eq!(probe.count(), 3);
}

#[tokio::test]
async fn test_envelope_ack_repeats_and_delegates() {
    let probe = AckProbe::new();
    let original = Envelope::ackable("raw", probe.supplier());
    let derived = original.with_payload(7_u8);

    for _ in 0..2 {
        original.ack().await.unwrap();
    }
    derived.ack().await.unwrap();

    assert_eq!(*derived.payload(), 7);
    assert_eq!(probe.count(), 3);
}
