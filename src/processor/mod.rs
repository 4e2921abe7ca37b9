//! Message processor.
//!
//! Applies the resolved transform to one delivered record and publishes the
//! outcome: the transformed value to the target topic, or an
//! [`ErrorEnvelope`] to the dead-letter topic. Exactly one publish is
//! attempted per record that has a transform, and no error escapes
//! [`MessageProcessor::process`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::dlq::{dead_letter_headers, dlq_topic, ErrorEnvelope};
use crate::expression::{CompiledExpression, ExpressionError};
use crate::registry::TransformRuntime;
use crate::transport::{Headers, InboundMessage, MessageProducer, OutboundMessage, REQUEST_ID_HEADER};

/// Result type for per-message transformation.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Per-message failures. Each one routes the record to the dead-letter topic.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Message value is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Message value is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("{0}")]
    Evaluation(#[from] ExpressionError),

    #[error("Expression evaluation panicked: {0}")]
    Panicked(String),
}

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No transform for the topic; nothing published.
    Skipped,
    /// Transformed value sent to the target topic.
    Transformed { published: bool },
    /// Error envelope sent to the dead-letter topic.
    DeadLettered { published: bool },
}

/// Parse a raw value and run it through a compiled expression.
///
/// An empty value is treated as JSON `null`. A panic inside the expression
/// is reported as [`ProcessingError::Panicked`].
pub fn transform(value: &[u8], compiled: &dyn CompiledExpression) -> Result<Vec<u8>> {
    let input = if value.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(std::str::from_utf8(value)?)?
    };
    let output = panic::catch_unwind(AssertUnwindSafe(|| compiled.evaluate(&input)))
        .map_err(|payload| ProcessingError::Panicked(panic_message(payload.as_ref())))??;
    Ok(serde_json::to_vec(&output)?)
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Correlation id from `x-request-id`, or a fresh one.
pub fn correlation_id(message: &InboundMessage) -> String {
    message
        .headers
        .get(REQUEST_ID_HEADER)
        .map(|v| String::from_utf8_lossy(v).trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn outbound_key(message: &InboundMessage, request_id: &str) -> Vec<u8> {
    match &message.key {
        Some(key) if !key.is_empty() => key.clone(),
        _ => request_id.as_bytes().to_vec(),
    }
}

fn with_request_id(original: &Headers, request_id: &str) -> Headers {
    let mut headers = original.clone();
    headers.insert(REQUEST_ID_HEADER.to_string(), request_id.as_bytes().to_vec());
    headers
}

/// Transforms records and publishes the results.
#[derive(Clone)]
pub struct MessageProcessor {
    producer: Arc<dyn MessageProducer>,
    dlq_topic: Option<String>,
}

impl MessageProcessor {
    pub fn new(producer: Arc<dyn MessageProducer>, dlq_topic: Option<String>) -> Self {
        Self {
            producer,
            dlq_topic,
        }
    }

    /// Globally configured dead-letter topic, if any.
    pub fn dlq_topic(&self) -> Option<&str> {
        self.dlq_topic.as_deref()
    }

    /// Process one record against the transform resolved for its topic.
    pub async fn process(
        &self,
        message: &InboundMessage,
        runtime: Option<&TransformRuntime>,
    ) -> ProcessOutcome {
        let Some(runtime) = runtime else {
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "No transform for topic; skipping message"
            );
            return ProcessOutcome::Skipped;
        };

        let request_id = correlation_id(message);
        let span = info_span!(
            "message",
            request_id = %request_id,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
        );

        self.apply(message, runtime, &request_id)
            .instrument(span)
            .await
    }

    async fn apply(
        &self,
        message: &InboundMessage,
        runtime: &TransformRuntime,
        request_id: &str,
    ) -> ProcessOutcome {
        let key = outbound_key(message, request_id);

        match transform(&message.value, runtime.compiled.as_ref()) {
            Ok(value) => {
                let published = self
                    .publish(OutboundMessage {
                        topic: runtime.target_topic.clone(),
                        key,
                        value,
                        headers: with_request_id(&message.headers, request_id),
                    })
                    .await;

                if published {
                    info!(
                        target_topic = %runtime.target_topic,
                        transform_id = %runtime.id,
                        version = runtime.version,
                        "Transformed message"
                    );
                }
                ProcessOutcome::Transformed { published }
            }
            Err(e) => {
                let destination = dlq_topic(&message.topic, self.dlq_topic());
                error!(
                    error = %e,
                    target_topic = %runtime.target_topic,
                    transform_id = %runtime.id,
                    version = runtime.version,
                    dlq_topic = %destination,
                    "Transform failed; writing to DLQ"
                );

                let envelope =
                    ErrorEnvelope::new(message, runtime, e.to_string(), Some(format!("{:?}", e)));
                let value = envelope
                    .to_bytes()
                    .unwrap_or_else(|_| envelope.error.clone().into_bytes());

                let published = self
                    .publish(OutboundMessage {
                        topic: destination,
                        key,
                        value,
                        headers: dead_letter_headers(&message.headers, request_id),
                    })
                    .await;
                ProcessOutcome::DeadLettered { published }
            }
        }
    }

    async fn publish(&self, message: OutboundMessage) -> bool {
        let topic = message.topic.clone();
        match self.producer.publish(message).await {
            Ok(()) => true,
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to publish message");
                false
            }
        }
    }
}
