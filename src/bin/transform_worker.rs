//! transform-worker: per-topic transform worker
//!
//! Subscribes to every source topic with an active transform, publishes
//! transformed records to the target topics, and dead-letters failures.
//!
//! ## Architecture
//! ```text
//! [MongoDB transforms] --refresh--> [registry]
//!                                       |
//! [Kafka source topics] -> [transform-worker] -> [target topics]
//!                                       |
//!                                       +------> [{source}.dlq | DLQ_TOPIC]
//! ```
//!
//! ## Configuration
//! - KAFKA_BROKERS: Comma-separated brokers (default: broker:9092)
//! - KAFKA_CLIENT_ID / KAFKA_GROUP_ID: Client and group ids (default: worker-jsonata)
//! - WORKSPACE_ID: Only load transforms for this workspace
//! - DLQ_TOPIC: Single dead-letter topic for all sources
//! - MONGO_URI / MONGO_DB: Definition store (default: mongodb://mongodb:27017, control-api)
//! - REFRESH_INTERVAL_MS: Registry reload interval (default: 60000)
//! - TRANSFORM_WORKER_LOG / LOG_LEVEL: Log filter; LOG_FORMAT=json for JSON logs

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use transform_worker::config::Config;
use transform_worker::utils::bootstrap::init_tracing;
use transform_worker::worker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        kafka_brokers = ?config.kafka.brokers,
        client_id = %config.kafka.client_id,
        group_id = %config.kafka.group_id,
        sasl = config.kafka.sasl_password.is_some(),
        workspace_id = ?config.worker.workspace_id,
        dlq_topic = ?config.worker.dlq_topic,
        mongo_uri = %config.mongodb.redacted_uri(),
        mongo_db = %config.mongodb.database,
        refresh_interval_ms = config.worker.refresh_interval_ms,
        "Starting transform-worker"
    );

    let mut worker = worker::connect(&config).await.map_err(|e| {
        error!(error = %e, "transform-worker failed to start");
        e
    })?;

    worker.start().await.map_err(|e| {
        error!(error = %e, "transform-worker failed to start");
        e
    })?;

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }

    worker.shutdown().await;
    Ok(())
}
