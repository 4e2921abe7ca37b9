use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::*;
use crate::expression::JsonataEngine;
use crate::registry::TransformRegistry;
use crate::store::{MockDefinitionStore, TransformDefinition};
use crate::transport::{
    InboundMessage, MessageProducer, MockConsumer, MockProducer, OutboundMessage,
};

struct Fixture {
    consumer: Arc<MockConsumer>,
    producer: Arc<MockProducer>,
    consumption: ConsumptionLoop,
}

async fn fixture(definitions: Vec<TransformDefinition>) -> Fixture {
    let store = Arc::new(MockDefinitionStore::with_definitions(definitions));
    let registry = TransformRegistry::new(store, Arc::new(JsonataEngine::new()), None);
    let snapshot = registry.load().await.unwrap();
    let topics: Vec<String> = snapshot.topics().into_iter().collect();

    let consumer = Arc::new(MockConsumer::new());
    consumer.subscribe(&topics).await.unwrap();
    let producer = Arc::new(MockProducer::new());

    let consumption = ConsumptionLoop::new(
        consumer.clone(),
        SharedRegistry::new(snapshot),
        MessageProcessor::new(producer.clone(), None),
    );

    Fixture {
        consumer,
        producer,
        consumption,
    }
}

async fn wait_for_commits(consumer: &MockConsumer, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while consumer.committed().await.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("commits did not arrive in time");
}

#[tokio::test]
async fn test_processes_then_commits_in_order() {
    let f = fixture(vec![TransformDefinition::active(
        "t1",
        "orders.raw",
        "orders.enriched",
        1,
        "$.amount * 2",
    )])
    .await;

    for offset in 0..3 {
        f.consumer
            .push(InboundMessage::new(
                "orders.raw",
                0,
                offset,
                format!(r#"{{"amount":{}}}"#, offset),
            ))
            .await;
    }

    let handle = f.consumption.start(1);
    wait_for_commits(&f.consumer, 3).await;
    handle.stop().await;

    let values: Vec<Vec<u8>> = f
        .producer
        .published_to("orders.enriched")
        .await
        .into_iter()
        .map(|m| m.value)
        .collect();
    assert_eq!(values, vec![b"0".to_vec(), b"2".to_vec(), b"4".to_vec()]);

    let offsets: Vec<i64> = f.consumer.committed().await.iter().map(|c| c.2).collect();
    assert_eq!(offsets, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_commits_after_dead_letter_and_continues() {
    let f = fixture(vec![TransformDefinition::active(
        "t1",
        "orders.raw",
        "orders.enriched",
        1,
        "$.amount",
    )])
    .await;

    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, "{not-json"))
        .await;
    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 1, r#"{"amount":5}"#))
        .await;

    let handle = f.consumption.start(1);
    wait_for_commits(&f.consumer, 2).await;
    handle.stop().await;

    assert_eq!(f.producer.published_to("orders.raw.dlq").await.len(), 1);
    assert_eq!(f.producer.published_to("orders.enriched").await.len(), 1);
}

#[tokio::test]
async fn test_commits_even_when_publish_fails() {
    let f = fixture(vec![TransformDefinition::active(
        "t1", "a", "b", 1, "$",
    )])
    .await;
    f.producer.set_fail_on_publish(true).await;
    f.consumer.push(InboundMessage::new("a", 0, 9, "1")).await;

    let handle = f.consumption.start(1);
    wait_for_commits(&f.consumer, 1).await;
    handle.stop().await;

    assert_eq!(f.producer.publish_attempts(), 1);
    assert_eq!(f.consumer.committed().await, vec![("a".to_string(), 0, 9)]);
}

#[tokio::test]
async fn test_stop_interrupts_pending_receive() {
    let f = fixture(vec![TransformDefinition::active(
        "t1", "a", "b", 1, "$",
    )])
    .await;

    let handle = f.consumption.start(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());

    tokio::time::timeout(Duration::from_secs(1), handle.stop())
        .await
        .expect("stop should not hang");
}

#[tokio::test]
async fn test_idle_without_topics_never_polls() {
    let f = fixture(Vec::new()).await;
    assert_eq!(f.consumer.subscription().await, Vec::<String>::new());

    let handle = f.consumption.start(0);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!handle.is_finished());
    assert_eq!(f.consumer.recv_calls(), 0);

    handle.stop().await;
}

#[tokio::test]
async fn test_loop_ends_when_consumer_closes() {
    let f = fixture(vec![TransformDefinition::active(
        "t1", "a", "b", 1, "$",
    )])
    .await;

    let handle = f.consumption.start(1);
    f.consumer.close().await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("loop should end after close");
}

#[tokio::test]
async fn test_sees_registry_swap_between_messages() {
    let f = fixture(vec![TransformDefinition::active(
        "t1",
        "orders.raw",
        "orders.enriched",
        1,
        "$.amount",
    )])
    .await;
    let registry = f.consumption.registry.clone();

    let handle = f.consumption.start(1);
    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"amount":3}"#))
        .await;
    wait_for_commits(&f.consumer, 1).await;

    let v2 = TransformRegistry::new(
        Arc::new(MockDefinitionStore::with_definitions(vec![
            TransformDefinition::active("t1", "orders.raw", "orders.enriched", 2, "$.amount * 10"),
        ])),
        Arc::new(JsonataEngine::new()),
        None,
    )
    .load()
    .await
    .unwrap();
    registry.install(v2);

    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 1, r#"{"amount":3}"#))
        .await;
    wait_for_commits(&f.consumer, 2).await;
    handle.stop().await;

    let values: BTreeSet<Vec<u8>> = f
        .producer
        .published_to("orders.enriched")
        .await
        .into_iter()
        .map(|m| m.value)
        .collect();
    assert_eq!(values, BTreeSet::from([b"3".to_vec(), b"30".to_vec()]));
}

/// Panics on its first publish, then records like a mock.
#[derive(Default)]
struct PanicOnceProducer {
    inner: MockProducer,
    fired: AtomicBool,
}

#[async_trait]
impl MessageProducer for PanicOnceProducer {
    async fn publish(&self, message: OutboundMessage) -> crate::transport::Result<()> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            panic!("producer failed hard");
        }
        self.inner.publish(message).await
    }
}

#[tokio::test]
async fn test_panic_while_handling_does_not_stop_consumption() {
    let f = fixture(vec![TransformDefinition::active(
        "t1",
        "orders.raw",
        "orders.enriched",
        1,
        "$.amount",
    )])
    .await;
    let producer = Arc::new(PanicOnceProducer::default());
    let consumption = ConsumptionLoop::new(
        f.consumer.clone(),
        f.consumption.registry.clone(),
        MessageProcessor::new(producer.clone(), None),
    );

    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"amount":1}"#))
        .await;
    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 1, r#"{"amount":2}"#))
        .await;

    let handle = consumption.start(1);
    wait_for_commits(&f.consumer, 2).await;
    assert!(!handle.is_finished());
    handle.stop().await;

    let offsets: Vec<i64> = f.consumer.committed().await.iter().map(|c| c.2).collect();
    assert_eq!(offsets, vec![0, 1]);
    let values: Vec<Vec<u8>> = producer
        .inner
        .published_to("orders.enriched")
        .await
        .into_iter()
        .map(|m| m.value)
        .collect();
    assert_eq!(values, vec![b"2".to_vec()]);
}

#[tokio::test]
async fn test_oversized_substring_is_handled_and_next_message_flows() {
    let f = fixture(vec![TransformDefinition::active(
        "t1",
        "orders.raw",
        "orders.enriched",
        1,
        r#"$substring("abcdef", 1, n)"#,
    )])
    .await;

    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"n":1e19}"#))
        .await;
    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 1, r#"{"n":2}"#))
        .await;

    let handle = f.consumption.start(1);
    wait_for_commits(&f.consumer, 2).await;
    handle.stop().await;

    let values: Vec<Vec<u8>> = f
        .producer
        .published_to("orders.enriched")
        .await
        .into_iter()
        .map(|m| m.value)
        .collect();
    assert_eq!(values, vec![br#""bcdef""#.to_vec(), br#""bc""#.to_vec()]);
}
