//! End-to-end worker scenarios over in-memory backends.
//!
//! Run with: cargo test --test worker_scenarios

use std::sync::Arc;
use std::time::Duration;

use transform_worker::config::WorkerConfig;
use transform_worker::dlq::{ErrorEnvelope, DLQ_REASON_HEADER};
use transform_worker::expression::JsonataEngine;
use transform_worker::store::{MockDefinitionStore, TransformDefinition};
use transform_worker::transport::{
    InboundMessage, MockConsumer, MockProducer, OutboundMessage, REQUEST_ID_HEADER,
};
use transform_worker::Worker;

struct Harness {
    store: Arc<MockDefinitionStore>,
    producer: Arc<MockProducer>,
    consumer: Arc<MockConsumer>,
    worker: Worker,
}

async fn start(settings: WorkerConfig, definitions: Vec<TransformDefinition>) -> Harness {
    let store = Arc::new(MockDefinitionStore::with_definitions(definitions));
    let producer = Arc::new(MockProducer::new());
    let consumer = Arc::new(MockConsumer::new());
    let mut worker = Worker::new(
        settings,
        store.clone(),
        producer.clone(),
        consumer.clone(),
        Arc::new(JsonataEngine::new()),
    );
    worker.start().await.expect("worker should start");

    Harness {
        store,
        producer,
        consumer,
        worker,
    }
}

async fn published(producer: &MockProducer, topic: &str, count: usize) -> Vec<OutboundMessage> {
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let messages = producer.published_to(topic).await;
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no message on {}", topic))
}

fn orders(version: i64, expression: &str) -> TransformDefinition {
    TransformDefinition::active(
        format!("orders-v{}", version),
        "orders.raw",
        "orders.enriched",
        version,
        expression,
    )
}

#[tokio::test]
async fn scenario_a_transforms_to_target() {
    let h = start(WorkerConfig::default(), vec![orders(1, "$.amount * 2")]).await;

    h.consumer
        .push(
            InboundMessage::new("orders.raw", 0, 0, r#"{"amount":2}"#)
                .with_header(REQUEST_ID_HEADER, "req-a"),
        )
        .await;

    let messages = published(&h.producer, "orders.enriched", 1).await;
    assert_eq!(messages[0].value, b"4");
    assert_eq!(messages[0].header_str(REQUEST_ID_HEADER), Some("req-a"));
    assert_eq!(h.producer.published_count().await, 1);

    h.worker.shutdown().await;
}

#[tokio::test]
async fn scenario_b_invalid_json_dead_lettered() {
    let h = start(WorkerConfig::default(), vec![orders(1, "$.amount * 2")]).await;

    h.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, "{not-json"))
        .await;

    let messages = published(&h.producer, "orders.raw.dlq", 1).await;
    assert_eq!(
        messages[0].header_str(DLQ_REASON_HEADER),
        Some("jsonata-transform-failed")
    );
    assert!(messages[0].header_str(REQUEST_ID_HEADER).is_some());

    let envelope: ErrorEnvelope = serde_json::from_slice(&messages[0].value).unwrap();
    assert_eq!(envelope.source_topic, "orders.raw");
    assert_eq!(envelope.target_topic, "orders.enriched");
    assert!(h.producer.published_to("orders.enriched").await.is_empty());

    h.worker.shutdown().await;
}

#[tokio::test]
async fn scenario_b_with_global_dead_letter_topic() {
    let settings = WorkerConfig {
        dlq_topic: Some("platform.dlq".to_string()),
        ..Default::default()
    };
    let h = start(settings, vec![orders(1, "$.amount * 2")]).await;

    h.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, "{not-json"))
        .await;

    published(&h.producer, "platform.dlq", 1).await;
    assert!(h.producer.published_to("orders.raw.dlq").await.is_empty());

    h.worker.shutdown().await;
}

#[tokio::test]
async fn scenario_c_highest_version_selected() {
    let h = start(
        WorkerConfig::default(),
        vec![orders(1, "$.amount"), orders(2, "$.amount * 100")],
    )
    .await;

    let runtime = h.worker.registry().resolve("orders.raw").unwrap();
    assert_eq!(runtime.version, 2);
    assert_eq!(h.worker.registry().snapshot().len(), 1);

    h.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"amount":2}"#))
        .await;
    let messages = published(&h.producer, "orders.enriched", 1).await;
    assert_eq!(messages[0].value, b"200");

    h.worker.shutdown().await;
}

#[tokio::test]
async fn scenario_d_new_topic_picked_up_without_restart() {
    let settings = WorkerConfig {
        refresh_interval_ms: 20,
        ..Default::default()
    };
    let h = start(settings, vec![orders(1, "$.amount * 2")]).await;

    // Arrives before the transform exists; held until the topic is subscribed.
    h.consumer
        .push(InboundMessage::new("orders.updates", 0, 0, r#"{"status":"shipped"}"#))
        .await;

    h.store
        .insert(TransformDefinition::active(
            "updates-v1",
            "orders.updates",
            "orders.timeline",
            1,
            r#"{"event": $uppercase(status)}"#,
        ))
        .await;

    let messages = published(&h.producer, "orders.timeline", 1).await;
    assert_eq!(messages[0].value, br#"{"event":"SHIPPED"}"#);
    assert!(h
        .consumer
        .subscription()
        .await
        .contains(&"orders.updates".to_string()));

    // The original topic keeps flowing after the resubscription.
    h.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"amount":21}"#))
        .await;
    let messages = published(&h.producer, "orders.enriched", 1).await;
    assert_eq!(messages[0].value, b"42");

    h.worker.shutdown().await;
}

#[tokio::test]
async fn one_bad_definition_does_not_block_others() {
    let h = start(
        WorkerConfig::default(),
        vec![
            orders(1, "$.amount * 2"),
            TransformDefinition::active("broken", "payments.raw", "payments.out", 1, "$.("),
        ],
    )
    .await;

    assert!(h.worker.registry().resolve("payments.raw").is_none());
    assert_eq!(h.consumer.subscription().await, vec!["orders.raw".to_string()]);

    h.worker.shutdown().await;
}
