use super::*;
use crate::expression::JsonataEngine;
use crate::processor::MessageProcessor;
use crate::store::{MockDefinitionStore, TransformDefinition};
use crate::transport::{InboundMessage, MockConsumer, MockProducer, OutboundMessage};

struct Fixture {
    store: Arc<MockDefinitionStore>,
    consumer: Arc<MockConsumer>,
    producer: Arc<MockProducer>,
    shared: SharedRegistry,
    manager: Arc<SubscriptionManager>,
}

fn fixture(definitions: Vec<TransformDefinition>) -> Fixture {
    let store = Arc::new(MockDefinitionStore::with_definitions(definitions));
    let consumer = Arc::new(MockConsumer::new());
    let producer = Arc::new(MockProducer::new());
    let shared = SharedRegistry::default();

    let registry = TransformRegistry::new(store.clone(), Arc::new(JsonataEngine::new()), None);
    let consumption = ConsumptionLoop::new(
        consumer.clone(),
        shared.clone(),
        MessageProcessor::new(producer.clone(), None),
    );
    let manager = Arc::new(SubscriptionManager::new(
        registry,
        shared.clone(),
        consumer.clone(),
        consumption,
    ));

    Fixture {
        store,
        consumer,
        producer,
        shared,
        manager,
    }
}

fn orders_v1() -> TransformDefinition {
    TransformDefinition::active("t1", "orders.raw", "orders.enriched", 1, "$.amount * 2")
}

async fn wait_for_published(producer: &MockProducer, topic: &str, count: usize) -> Vec<OutboundMessage> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let published = producer.published_to(topic).await;
            if published.len() >= count {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("messages were not published in time")
}

#[tokio::test]
async fn test_start_subscribes_and_installs() {
    let f = fixture(vec![orders_v1()]);
    f.manager.start().await.unwrap();

    assert_eq!(f.consumer.subscription().await, vec!["orders.raw".to_string()]);
    assert!(f.shared.resolve("orders.raw").is_some());

    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"amount":2}"#))
        .await;
    let published = wait_for_published(&f.producer, "orders.enriched", 1).await;
    assert_eq!(published[0].value, b"4");

    f.manager.stop().await;
}

#[tokio::test]
async fn test_start_fails_when_store_unavailable() {
    let f = fixture(vec![orders_v1()]);
    f.store.set_fail_on_find(true).await;

    let result = f.manager.start().await;
    assert!(matches!(result, Err(SubscriptionError::Store(_))));
    assert!(f.consumer.subscribe_history().await.is_empty());
}

#[tokio::test]
async fn test_refresh_subscribes_to_new_topic() {
    let f = fixture(vec![orders_v1()]);
    f.manager.start().await.unwrap();

    f.store
        .insert(TransformDefinition::active(
            "t2",
            "orders.updates",
            "orders.audit",
            1,
            "{\"id\": id}",
        ))
        .await;
    let report = f.manager.refresh().await.unwrap();

    assert_eq!(report.new_topics, vec!["orders.updates".to_string()]);
    assert_eq!(report.transforms, 2);
    assert_eq!(
        f.consumer.subscription().await,
        vec!["orders.raw".to_string(), "orders.updates".to_string()]
    );

    f.consumer
        .push(InboundMessage::new("orders.updates", 0, 0, r#"{"id":"o-1","x":1}"#))
        .await;
    let published = wait_for_published(&f.producer, "orders.audit", 1).await;
    assert_eq!(published[0].value, br#"{"id":"o-1"}"#);

    f.manager.stop().await;
}

#[tokio::test]
async fn test_refresh_without_new_topics_still_swaps_snapshot() {
    let f = fixture(vec![orders_v1()]);
    f.manager.start().await.unwrap();

    f.store
        .replace(vec![TransformDefinition::active(
            "t1",
            "orders.raw",
            "orders.enriched",
            1,
            "$.amount * 3",
        )])
        .await;
    let report = f.manager.refresh().await.unwrap();

    assert!(report.new_topics.is_empty());
    assert_eq!(f.consumer.subscribe_history().await.len(), 1);
    assert_eq!(f.shared.resolve("orders.raw").unwrap().expression, "$.amount * 3");

    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"amount":2}"#))
        .await;
    let published = wait_for_published(&f.producer, "orders.enriched", 1).await;
    assert_eq!(published[0].value, b"6");

    f.manager.stop().await;
}

#[tokio::test]
async fn test_refresh_store_failure_keeps_previous_state() {
    let f = fixture(vec![orders_v1()]);
    f.manager.start().await.unwrap();
    let before = f.shared.snapshot();

    f.store.set_fail_on_find(true).await;
    let result = f.manager.refresh().await;

    assert!(matches!(result, Err(SubscriptionError::Store(_))));
    assert!(Arc::ptr_eq(&before, &f.shared.snapshot()));
    assert_eq!(f.manager.topics().await, BTreeSet::from(["orders.raw".to_string()]));
    assert_eq!(f.consumer.subscribe_history().await.len(), 1);

    f.manager.stop().await;
}

#[tokio::test]
async fn test_refresh_subscribe_failure_keeps_previous_state() {
    let f = fixture(vec![orders_v1()]);
    f.manager.start().await.unwrap();
    let before = f.shared.snapshot();

    f.store
        .insert(TransformDefinition::active("t2", "new.raw", "new.out", 1, "$"))
        .await;
    f.consumer.set_fail_on_subscribe(true).await;
    let result = f.manager.refresh().await;

    assert!(matches!(result, Err(SubscriptionError::Transport(_))));
    assert!(Arc::ptr_eq(&before, &f.shared.snapshot()));
    assert_eq!(f.manager.subscribed().await, vec!["orders.raw".to_string()]);

    // Consumption was restarted on the old subscription.
    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"amount":1}"#))
        .await;
    wait_for_published(&f.producer, "orders.enriched", 1).await;

    // A later refresh retries the new topic.
    f.consumer.set_fail_on_subscribe(false).await;
    let report = f.manager.refresh().await.unwrap();
    assert_eq!(report.new_topics, vec!["new.raw".to_string()]);

    f.manager.stop().await;
}

#[tokio::test]
async fn test_empty_registry_idles_until_topics_appear() {
    let f = fixture(Vec::new());
    f.manager.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(f.consumer.recv_calls(), 0);
    assert!(f.shared.snapshot().is_empty());

    f.store.insert(orders_v1()).await;
    f.manager.refresh().await.unwrap();

    f.consumer
        .push(InboundMessage::new("orders.raw", 0, 0, r#"{"amount":5}"#))
        .await;
    let published = wait_for_published(&f.producer, "orders.enriched", 1).await;
    assert_eq!(published[0].value, b"10");

    f.manager.stop().await;
}

#[tokio::test]
async fn test_removed_topic_dropped_at_next_resubscription() {
    let f = fixture(vec![
        orders_v1(),
        TransformDefinition::active("t2", "old.raw", "old.out", 1, "$"),
    ]);
    f.manager.start().await.unwrap();

    f.store.replace(vec![orders_v1()]).await;
    f.manager.refresh().await.unwrap();

    // No new topics: the subscription is untouched, the transform is gone.
    assert!(f.shared.resolve("old.raw").is_none());
    assert_eq!(f.manager.topics().await.len(), 1);
    assert_eq!(
        f.manager.subscribed().await,
        vec!["old.raw".to_string(), "orders.raw".to_string()]
    );

    // Delivered but skipped: no publish, still committed.
    f.consumer.push(InboundMessage::new("old.raw", 0, 4, "1")).await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while f.consumer.committed().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(f.producer.publish_attempts(), 0);

    // The next resubscription covers only current and new topics.
    f.store
        .insert(TransformDefinition::active("t3", "payments.raw", "payments.out", 1, "$"))
        .await;
    let report = f.manager.refresh().await.unwrap();
    assert_eq!(report.new_topics, vec!["payments.raw".to_string()]);
    assert_eq!(
        f.manager.subscribed().await,
        vec!["orders.raw".to_string(), "payments.raw".to_string()]
    );
    assert_eq!(f.consumer.subscription().await, f.manager.subscribed().await);

    f.manager.stop().await;
}

#[tokio::test]
async fn test_refresh_task_picks_up_new_topics() {
    let f = fixture(vec![orders_v1()]);
    f.manager.start().await.unwrap();
    let task = spawn_refresh_task(f.manager.clone(), Duration::from_millis(20));

    f.store
        .insert(TransformDefinition::active("t2", "orders.updates", "orders.audit", 1, "$"))
        .await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while !f.manager.topics().await.contains("orders.updates") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("refresh task did not pick up the new topic");

    task.stop().await;
    let calls = f.store.find_calls().await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(f.store.find_calls().await, calls);

    f.manager.stop().await;
}
