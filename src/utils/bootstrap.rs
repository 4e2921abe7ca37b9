//! Bootstrap utilities for the worker binary.

use std::future::Future;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR, LOG_LEVEL_ENV_VAR};

/// Build the log filter.
///
/// `TRANSFORM_WORKER_LOG` takes a full filter directive; otherwise
/// `LOG_LEVEL` is used, then "info".
pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_env(LOG_LEVEL_ENV_VAR))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize tracing.
///
/// `LOG_FORMAT=json` selects structured JSON output.
pub fn init_tracing() {
    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(log_filter());
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Connect to a backing service with exponential backoff retry.
///
/// # Arguments
/// * `service_name` - Human-readable name for logging (e.g., "MongoDB")
/// * `address` - The address to connect to, already redacted
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connected client on success, or the last error after max retries.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff(
        service_name,
        address,
        RetryPolicy::default(),
        connect,
    )
    .await
}

/// Backoff bounds for [`retry_with_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Retry `connect` with doubling delays until it succeeds or attempts run out.
pub async fn retry_with_backoff<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    policy: RetryPolicy,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(client) => {
                tracing::info!(service = service_name, address, "Connected");
                return Ok(client);
            }
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    service = service_name,
                    address,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    retry_in = ?delay,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, policy.max_delay);
            }
            Err(e) => {
                tracing::error!(
                    service = service_name,
                    address,
                    attempts = attempt,
                    error = %e,
                    "Giving up on connection"
                );
                return Err(e);
            }
        }
    }
}
