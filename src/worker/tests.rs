use std::time::Duration;

use super::*;
use crate::expression::JsonataEngine;
use crate::store::{MockDefinitionStore, TransformDefinition};
use crate::transport::{MockConsumer, MockProducer};

struct Fixture {
    store: Arc<MockDefinitionStore>,
    producer: Arc<MockProducer>,
    consumer: Arc<MockConsumer>,
    worker: Worker,
}

fn fixture(settings: WorkerConfig, definitions: Vec<TransformDefinition>) -> Fixture {
    let store = Arc::new(MockDefinitionStore::with_definitions(definitions));
    let producer = Arc::new(MockProducer::new());
    let consumer = Arc::new(MockConsumer::new());
    let worker = Worker::new(
        settings,
        store.clone(),
        producer.clone(),
        consumer.clone(),
        Arc::new(JsonataEngine::new()),
    );
    Fixture {
        store,
        producer,
        consumer,
        worker,
    }
}

fn orders() -> TransformDefinition {
    TransformDefinition::active("t1", "orders.raw", "orders.enriched", 1, "$").in_workspace("ws1")
}

#[tokio::test]
async fn test_start_fails_when_store_unavailable() {
    let mut f = fixture(WorkerConfig::default(), vec![orders()]);
    f.store.set_fail_on_find(true).await;

    let result = f.worker.start().await;
    assert!(matches!(
        result,
        Err(WorkerError::Subscription(SubscriptionError::Store(_)))
    ));
}

#[tokio::test]
async fn test_workspace_scope_applies() {
    let settings = WorkerConfig {
        workspace_id: Some("ws2".to_string()),
        ..Default::default()
    };
    let mut f = fixture(settings, vec![orders()]);
    f.worker.start().await.unwrap();

    assert!(f.worker.registry().snapshot().is_empty());
    assert!(f.consumer.subscription().await.is_empty());

    f.worker.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_everything_despite_failures() {
    let mut f = fixture(WorkerConfig::default(), vec![orders()]);
    f.worker.start().await.unwrap();
    f.consumer.set_fail_on_close(true).await;

    tokio::time::timeout(Duration::from_secs(2), f.worker.shutdown())
        .await
        .expect("shutdown should not hang");

    assert!(!f.consumer.is_closed().await);
    assert!(f.producer.is_closed().await);
    assert!(f.store.is_closed().await);
}

#[tokio::test]
async fn test_refresh_timer_runs_until_shutdown() {
    let settings = WorkerConfig {
        refresh_interval_ms: 10,
        ..Default::default()
    };
    let mut f = fixture(settings, vec![orders()]);
    f.worker.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while f.store.find_calls().await < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("refresh timer did not tick");

    f.worker.shutdown().await;
    let calls = f.store.find_calls().await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(f.store.find_calls().await, calls);
}

#[tokio::test]
async fn test_refresh_now_reports_new_topics() {
    let mut f = fixture(WorkerConfig::default(), vec![orders()]);
    f.worker.start().await.unwrap();

    f.store
        .insert(TransformDefinition::active("t2", "payments.raw", "payments.out", 1, "$"))
        .await;
    let report = f.worker.refresh_now().await.unwrap();

    assert_eq!(report.new_topics, vec!["payments.raw".to_string()]);
    assert_eq!(
        f.worker.subscriptions().subscribed().await,
        vec!["orders.raw".to_string(), "payments.raw".to_string()]
    );

    f.worker.shutdown().await;
}
