//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock};

use super::{InboundMessage, MessageConsumer, MessageProducer, OutboundMessage, Result, TransportError};

/// Records published messages in memory.
#[derive(Default)]
pub struct MockProducer {
    published: RwLock<Vec<OutboundMessage>>,
    fail_on_publish: RwLock<bool>,
    publish_attempts: AtomicUsize,
    closed: RwLock<bool>,
}

impl MockProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.published.read().await.clone()
    }

    pub async fn published_to(&self, topic: &str) -> Vec<OutboundMessage> {
        self.published
            .read()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    /// Publish calls, including failed ones.
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

#[async_trait]
impl MessageProducer for MockProducer {
    async fn publish(&self, message: OutboundMessage) -> Result<()> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_publish.read().await {
            return Err(TransportError::Publish {
                topic: message.topic,
                message: "Mock publish failure".to_string(),
            });
        }
        self.published.write().await.push(message);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.closed.write().await = true;
        Ok(())
    }
}

/// In-memory consumer.
///
/// Pushed records wait in a queue and are delivered only while their topic
/// is part of the current subscription, the way a broker holds records for
/// topics a group has not yet joined.
#[derive(Default)]
pub struct MockConsumer {
    pending: Mutex<VecDeque<InboundMessage>>,
    arrived: Notify,
    subscription: RwLock<Vec<String>>,
    subscribe_history: RwLock<Vec<Vec<String>>>,
    committed: RwLock<Vec<(String, i32, i64)>>,
    recv_calls: AtomicUsize,
    fail_on_subscribe: RwLock<bool>,
    fail_on_close: RwLock<bool>,
    closed: RwLock<bool>,
}

impl MockConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a record for delivery.
    pub async fn push(&self, message: InboundMessage) {
        self.pending.lock().await.push_back(message);
        self.arrived.notify_waiters();
    }

    pub async fn set_fail_on_subscribe(&self, fail: bool) {
        *self.fail_on_subscribe.write().await = fail;
    }

    pub async fn set_fail_on_close(&self, fail: bool) {
        *self.fail_on_close.write().await = fail;
    }

    /// Current subscription.
    pub async fn subscription(&self) -> Vec<String> {
        self.subscription.read().await.clone()
    }

    /// Every successful subscribe call, in order.
    pub async fn subscribe_history(&self) -> Vec<Vec<String>> {
        self.subscribe_history.read().await.clone()
    }

    /// Committed (topic, partition, offset) triples, in order.
    pub async fn committed(&self) -> Vec<(String, i32, i64)> {
        self.committed.read().await.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn recv_calls(&self) -> usize {
        self.recv_calls.load(Ordering::SeqCst)
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }

    async fn take_deliverable(&self) -> Option<InboundMessage> {
        let subscription = self.subscription.read().await;
        let mut pending = self.pending.lock().await;
        let index = pending
            .iter()
            .position(|m| subscription.iter().any(|t| *t == m.topic))?;
        pending.remove(index)
    }
}

#[async_trait]
impl MessageConsumer for MockConsumer {
    async fn subscribe(&self, topics: &[String]) -> Result<()> {
        if *self.fail_on_subscribe.read().await {
            return Err(TransportError::Subscribe("Mock subscribe failure".to_string()));
        }
        *self.subscription.write().await = topics.to_vec();
        self.subscribe_history.write().await.push(topics.to_vec());
        self.arrived.notify_waiters();
        Ok(())
    }

    async fn recv(&self) -> Result<InboundMessage> {
        self.recv_calls.fetch_add(1, Ordering::SeqCst);
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if *self.closed.read().await {
                return Err(TransportError::Closed);
            }
            if let Some(message) = self.take_deliverable().await {
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn commit(&self, message: &InboundMessage) -> Result<()> {
        self.committed
            .write()
            .await
            .push((message.topic.clone(), message.partition, message.offset));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if *self.fail_on_close.read().await {
            return Err(TransportError::Connection("Mock close failure".to_string()));
        }
        *self.closed.write().await = true;
        self.arrived.notify_waiters();
        Ok(())
    }
}
