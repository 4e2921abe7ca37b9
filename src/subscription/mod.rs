//! Subscription manager.
//!
//! Owns the live topic subscription and the consumption task. On startup it
//! subscribes to every topic the registry knows; on each refresh it reloads
//! the registry, resubscribes only when new source topics appeared, and then
//! installs the fresh snapshot.
//!
//! ## Refresh ordering
//!
//! When new topics appear: stop consumption, subscribe to the union of the
//! current and new topics, install the snapshot, restart consumption. The
//! transport therefore covers every topic before any reader can resolve it.
//! A failed store query or subscribe leaves the previous snapshot and
//! subscription untouched.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::consumption::{ConsumptionHandle, ConsumptionLoop};
use crate::registry::{SharedRegistry, TransformRegistry};
use crate::store::StoreError;
use crate::transport::{MessageConsumer, TransportError};

/// Result type for subscription operations.
pub type Result<T> = std::result::Result<T, SubscriptionError>;

/// Errors raised by startup or a refresh.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Failed to load transforms: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to update subscription: {0}")]
    Transport(#[from] TransportError),
}

/// Summary of a completed refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// Topics subscribed by this refresh.
    pub new_topics: Vec<String>,
    /// Transforms in the installed snapshot.
    pub transforms: usize,
}

#[derive(Default)]
struct State {
    /// Topics of the installed snapshot.
    topics: BTreeSet<String>,
    /// Topics the consumer is subscribed to.
    subscribed: Vec<String>,
    consumption: Option<ConsumptionHandle>,
}

/// Keeps the consumer subscription in step with the transform registry.
pub struct SubscriptionManager {
    registry: TransformRegistry,
    shared: SharedRegistry,
    consumer: Arc<dyn MessageConsumer>,
    consumption: ConsumptionLoop,
    state: Mutex<State>,
}

impl SubscriptionManager {
    pub fn new(
        registry: TransformRegistry,
        shared: SharedRegistry,
        consumer: Arc<dyn MessageConsumer>,
        consumption: ConsumptionLoop,
    ) -> Self {
        Self {
            registry,
            shared,
            consumer,
            consumption,
            state: Mutex::new(State::default()),
        }
    }

    /// Initial load, subscribe, install, and start consuming.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let snapshot = self.registry.load().await?;
        let topics = snapshot.topics();
        let subscribed: Vec<String> = topics.iter().cloned().collect();

        self.consumer.subscribe(&subscribed).await?;
        self.shared.install(snapshot);

        state.consumption = Some(self.consumption.start(subscribed.len()));
        state.topics = topics;
        state.subscribed = subscribed;

        info!(topics = ?state.subscribed, "Subscription manager started");
        Ok(())
    }

    /// Reload the registry and resubscribe to any new source topics.
    ///
    /// Concurrent calls are serialised.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let mut state = self.state.lock().await;

        let fresh = self.registry.load().await?;
        let fresh_topics = fresh.topics();
        let new_topics: Vec<String> = fresh_topics.difference(&state.topics).cloned().collect();

        if !new_topics.is_empty() {
            let union: Vec<String> = state.topics.union(&fresh_topics).cloned().collect();
            info!(new_topics = ?new_topics, topics = ?union, "Resubscribing to include new topics");

            if let Some(handle) = state.consumption.take() {
                handle.stop().await;
            }

            if let Err(e) = self.consumer.subscribe(&union).await {
                state.consumption = Some(self.consumption.start(state.subscribed.len()));
                return Err(e.into());
            }

            self.shared.install(fresh);
            state.consumption = Some(self.consumption.start(union.len()));
            state.subscribed = union;
        } else {
            self.shared.install(fresh);
        }

        state.topics = fresh_topics;

        Ok(RefreshReport {
            new_topics,
            transforms: self.shared.snapshot().len(),
        })
    }

    /// Topics of the installed snapshot.
    pub async fn topics(&self) -> BTreeSet<String> {
        self.state.lock().await.topics.clone()
    }

    /// Topics the consumer is subscribed to.
    pub async fn subscribed(&self) -> Vec<String> {
        self.state.lock().await.subscribed.clone()
    }

    /// Stop the consumption task.
    pub async fn stop(&self) {
        let handle = self.state.lock().await.consumption.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }
}

/// Handle to a running refresh task.
pub struct RefreshTaskHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshTaskHandle {
    /// Signal the refresh task to stop and wait for it.
    pub async fn stop(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Refresh task failed");
        }
    }
}

/// Spawn a background task that refreshes the subscription every `interval`.
///
/// A refresh that outlasts the interval delays the next tick rather than
/// overlapping it.
pub fn spawn_refresh_task(
    manager: Arc<SubscriptionManager>,
    interval: Duration,
) -> RefreshTaskHandle {
    let (cancel_tx, mut cancel_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "Refresh task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match manager.refresh().await {
                        Ok(report) if !report.new_topics.is_empty() => info!(
                            new_topics = ?report.new_topics,
                            transforms = report.transforms,
                            "Transforms refreshed"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Refresh failed; keeping previous transforms"),
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!("Refresh task stopped");
                        break;
                    }
                }
            }
        }
    });

    RefreshTaskHandle {
        cancel: cancel_tx,
        task,
    }
}

#[cfg(test)]
mod tests;
