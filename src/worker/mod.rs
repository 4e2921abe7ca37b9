//! Worker wiring.
//!
//! Assembles the registry, processor, consumption loop and subscription
//! manager over a store, producer and consumer, runs the refresh timer, and
//! tears everything down on shutdown.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::{ConfigError, WorkerConfig};
use crate::consumption::ConsumptionLoop;
use crate::expression::ExpressionEngine;
use crate::processor::MessageProcessor;
use crate::registry::{SharedRegistry, TransformRegistry};
use crate::store::{DefinitionStore, StoreError};
use crate::subscription::{
    spawn_refresh_task, RefreshReport, RefreshTaskHandle, SubscriptionError, SubscriptionManager,
};
use crate::transport::{MessageConsumer, MessageProducer, TransportError};

/// Result type for worker lifecycle operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Startup failures. Any of these ends the process.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
}

/// A transform worker over a store, producer and consumer.
pub struct Worker {
    settings: WorkerConfig,
    store: Arc<dyn DefinitionStore>,
    producer: Arc<dyn MessageProducer>,
    consumer: Arc<dyn MessageConsumer>,
    registry: SharedRegistry,
    manager: Arc<SubscriptionManager>,
    refresh: Option<RefreshTaskHandle>,
}

impl Worker {
    pub fn new(
        settings: WorkerConfig,
        store: Arc<dyn DefinitionStore>,
        producer: Arc<dyn MessageProducer>,
        consumer: Arc<dyn MessageConsumer>,
        engine: Arc<dyn ExpressionEngine>,
    ) -> Self {
        let registry = SharedRegistry::default();
        let loader = TransformRegistry::new(store.clone(), engine, settings.workspace_id.clone());
        let processor = MessageProcessor::new(producer.clone(), settings.dlq_topic.clone());
        let consumption = ConsumptionLoop::new(consumer.clone(), registry.clone(), processor);
        let manager = Arc::new(SubscriptionManager::new(
            loader,
            registry.clone(),
            consumer.clone(),
            consumption,
        ));

        Self {
            settings,
            store,
            producer,
            consumer,
            registry,
            manager,
            refresh: None,
        }
    }

    /// Load transforms, subscribe, start consuming and start the refresh timer.
    pub async fn start(&mut self) -> Result<()> {
        self.manager.start().await?;
        self.refresh = Some(spawn_refresh_task(
            self.manager.clone(),
            self.settings.refresh_interval(),
        ));

        info!(
            workspace_id = ?self.settings.workspace_id,
            dlq_topic = ?self.settings.dlq_topic,
            refresh_interval_ms = self.settings.refresh_interval_ms,
            "Worker started"
        );
        Ok(())
    }

    /// Refresh immediately, outside the timer.
    pub async fn refresh_now(&self) -> Result<RefreshReport> {
        Ok(self.manager.refresh().await?)
    }

    /// The live registry.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Subscription manager driving this worker.
    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    /// Stop the timer and consumption, then close consumer, producer and
    /// store. Each close is attempted even if an earlier one fails.
    pub async fn shutdown(mut self) {
        info!("Shutdown requested");

        if let Some(refresh) = self.refresh.take() {
            refresh.stop().await;
        }
        self.manager.stop().await;

        if let Err(e) = self.consumer.close().await {
            error!(error = %e, "Error closing consumer");
        }
        if let Err(e) = self.producer.close().await {
            error!(error = %e, "Error closing producer");
        }
        if let Err(e) = self.store.close().await {
            error!(error = %e, "Error closing store");
        }

        info!("Worker stopped");
    }
}

/// Connect the production backends described by `config`.
#[cfg(all(feature = "kafka", feature = "mongodb"))]
pub async fn connect(config: &crate::config::Config) -> Result<Worker> {
    use crate::expression::JsonataEngine;
    use crate::store::MongoDefinitionStore;
    use crate::transport::{KafkaConsumer, KafkaProducer};
    use crate::utils::bootstrap::connect_with_retry;

    let store = connect_with_retry("MongoDB", &config.mongodb.redacted_uri(), || {
        MongoDefinitionStore::connect(&config.mongodb.uri, &config.mongodb.database)
    })
    .await?;

    let transport = config.kafka.transport_config();
    let producer = KafkaProducer::new(&transport)?;
    let consumer = KafkaConsumer::new(&transport)?;

    Ok(Worker::new(
        config.worker.clone(),
        Arc::new(store),
        Arc::new(producer),
        Arc::new(consumer),
        Arc::new(JsonataEngine::new()),
    ))
}

#[cfg(test)]
mod tests;
