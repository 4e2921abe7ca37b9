//! Message transport abstraction.
//!
//! The worker consumes records from source topics and publishes results to
//! target or dead-letter topics. Both directions sit behind traits so the
//! processing core never touches a broker client directly.
//!
//! Implementations:
//! - Kafka: `KafkaProducer` / `KafkaConsumer` (rdkafka)
//! - Mock: `MockProducer` / `MockConsumer` for testing

use std::collections::BTreeMap;

use async_trait::async_trait;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConsumer, KafkaProducer, KafkaTransportConfig};
pub use mock::{MockConsumer, MockProducer};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish to '{topic}' failed: {message}")]
    Publish { topic: String, message: String },

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Receive failed: {0}")]
    Receive(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Transport closed")]
    Closed,
}

/// Correlation id header carried on every inbound and outbound record.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Message headers. A later duplicate key overwrites an earlier one.
pub type Headers = BTreeMap<String, Vec<u8>>;

/// A record delivered from a subscribed topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: Headers,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Header value as UTF-8 text, if present and valid.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// A record to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: Headers,
}

impl OutboundMessage {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| std::str::from_utf8(v).ok())
    }
}

/// Publishes records with at-least-once acknowledgement.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Publish one record and wait for the broker acknowledgement.
    async fn publish(&self, message: OutboundMessage) -> Result<()>;

    /// Flush pending records and release the client.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Delivers records from a subscribed topic set.
///
/// Records within one partition arrive in offset order.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Replace the subscription with exactly `topics`.
    async fn subscribe(&self, topics: &[String]) -> Result<()>;

    /// Wait for the next record. Must be safe to cancel.
    async fn recv(&self) -> Result<InboundMessage>;

    /// Mark a record as consumed.
    async fn commit(&self, message: &InboundMessage) -> Result<()>;

    /// Leave the group and release the client.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
