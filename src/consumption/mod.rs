//! Consumption loop.
//!
//! One background task pulls records from the consumer, resolves each
//! record's transform against the current registry snapshot, processes it,
//! then commits its offset. Records are handled one at a time, so each
//! partition is processed in delivery order.
//!
//! Stopping waits for the in-flight record to finish; a pending receive is
//! abandoned. A panic while handling one record is logged and that record
//! is committed, so the task keeps consuming.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::processor::{panic_message, MessageProcessor};
use crate::registry::SharedRegistry;
use crate::transport::{MessageConsumer, TransportError};

/// Pause after a receive error before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// Everything a consumption task needs.
#[derive(Clone)]
pub struct ConsumptionLoop {
    consumer: Arc<dyn MessageConsumer>,
    registry: SharedRegistry,
    processor: MessageProcessor,
}

impl ConsumptionLoop {
    pub fn new(
        consumer: Arc<dyn MessageConsumer>,
        registry: SharedRegistry,
        processor: MessageProcessor,
    ) -> Self {
        Self {
            consumer,
            registry,
            processor,
        }
    }

    /// Spawn the consumption task.
    ///
    /// With no subscribed topics the task idles until stopped and never
    /// polls the consumer.
    pub fn start(&self, subscribed_topics: usize) -> ConsumptionHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let this = self.clone();

        let task = tokio::spawn(async move {
            if subscribed_topics == 0 {
                warn!("No topics to consume; idling until transforms are registered");
                this.idle(stop_rx).await;
            } else {
                info!(topics = subscribed_topics, "Consumption started");
                this.run(stop_rx).await;
            }
            info!("Consumption stopped");
        });

        ConsumptionHandle { stop_tx, task }
    }

    async fn idle(&self, mut stop_rx: watch::Receiver<bool>) {
        // Resolves once stop is signalled or the handle is dropped.
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
    }

    async fn run(&self, mut stop_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                received = self.consumer.recv() => match received {
                    Ok(message) => {
                        let runtime = self.registry.resolve(&message.topic);
                        let handled = AssertUnwindSafe(
                            self.processor.process(&message, runtime.as_deref()),
                        )
                        .catch_unwind()
                        .await;
                        match handled {
                            Ok(outcome) => debug!(
                                topic = %message.topic,
                                partition = message.partition,
                                offset = message.offset,
                                outcome = ?outcome,
                                "Message handled"
                            ),
                            Err(payload) => error!(
                                topic = %message.topic,
                                partition = message.partition,
                                offset = message.offset,
                                panic = %panic_message(payload.as_ref()),
                                "Message handling panicked; skipping"
                            ),
                        }

                        if let Err(e) = self.consumer.commit(&message).await {
                            error!(
                                topic = %message.topic,
                                partition = message.partition,
                                offset = message.offset,
                                error = %e,
                                "Failed to commit offset"
                            );
                        }
                    }
                    Err(TransportError::Closed) => {
                        info!("Consumer closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                        tokio::select! {
                            _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                            _ = stop_rx.wait_for(|stopped| *stopped) => break,
                        }
                    }
                },
            }
        }
    }
}

/// Handle to a running consumption task.
pub struct ConsumptionHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumptionHandle {
    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Consumption task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests;
