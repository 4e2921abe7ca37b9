//! MongoDB definition store integration tests.
//!
//! Run with: cargo test --test store_mongodb --features mongodb -- --ignored --nocapture
//!
//! Requires: MONGODB_URI env var or MongoDB on localhost:27017

use mongodb::bson::{doc, Document};
use transform_worker::store::{DefinitionStore, MongoDefinitionStore};

fn mongodb_uri() -> String {
    std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
}

fn mongodb_database() -> String {
    std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "transform_worker_test".to_string())
}

async fn cleanup(client: &mongodb::Client, db_name: &str) {
    let _ = client
        .database(db_name)
        .collection::<Document>("jsonatatransforms")
        .delete_many(doc! { "_id": { "$regex": "^test_" } })
        .await;
}

fn transform(id: &str, workspace: &str, source: &str, version: i32, status: &str) -> Document {
    doc! {
        "_id": id,
        "workspaceId": workspace,
        "name": id,
        "version": version,
        "expression": "$.amount * 2",
        "sourceTopic": source,
        "targetTopic": format!("{}.out", source),
        "status": status,
        "createdBy": "integration-test",
    }
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_mongodb_find_active_filters_and_orders() {
    println!("Connecting to: {}", mongodb_uri());

    let client = mongodb::Client::with_uri_str(&mongodb_uri())
        .await
        .expect("Failed to connect to MongoDB");
    let db_name = mongodb_database();
    cleanup(&client, &db_name).await;

    client
        .database(&db_name)
        .collection::<Document>("jsonatatransforms")
        .insert_many(vec![
            transform("test_a1", "ws-a", "test.orders", 1, "active"),
            transform("test_a2", "ws-a", "test.orders", 2, "active"),
            transform("test_a3", "ws-a", "test.orders", 3, "draft"),
            transform("test_b1", "ws-b", "test.payments", 5, "active"),
            transform("test_a4", "ws-a", "test.refunds", 2, "deprecated"),
        ])
        .await
        .expect("Failed to seed transforms");

    let store = MongoDefinitionStore::new(&client, &db_name);

    let scoped = store.find_active(Some("ws-a")).await.unwrap();
    let ids: Vec<&str> = scoped.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["test_a2", "test_a1"]);
    assert_eq!(scoped[0].target_topic, "test.orders.out");

    let all: Vec<String> = store
        .find_active(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.id.starts_with("test_"))
        .map(|d| d.id)
        .collect();
    assert_eq!(all, vec!["test_b1", "test_a2", "test_a1"]);

    cleanup(&client, &db_name).await;
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_mongodb_connect_and_close() {
    let store = MongoDefinitionStore::connect(&mongodb_uri(), &mongodb_database())
        .await
        .expect("Failed to connect to MongoDB");
    store.close().await.unwrap();
}
