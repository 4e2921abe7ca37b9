//! Dead-letter routing.
//!
//! Messages whose value cannot be parsed or whose transform fails to
//! evaluate are republished, with diagnostic context, to a dead-letter
//! topic for replay and forensics.
//!
//! ## Topic Naming
//!
//! A globally configured dead-letter topic takes precedence. Otherwise each
//! source topic has its own: `{source_topic}.dlq`.
//!
//! ## Message Format
//!
//! JSON [`ErrorEnvelope`] with camelCase keys. Headers are the original
//! message headers plus `x-request-id` and `x-dlq-reason`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::registry::TransformRuntime;
use crate::transport::{Headers, InboundMessage, REQUEST_ID_HEADER};

/// Suffix appended to the source topic when no global DLQ is configured.
pub const DLQ_TOPIC_SUFFIX: &str = ".dlq";

/// Header naming why a record was dead-lettered.
pub const DLQ_REASON_HEADER: &str = "x-dlq-reason";

/// Reason value for parse and evaluation failures.
pub const TRANSFORM_FAILED_REASON: &str = "jsonata-transform-failed";

/// Resolve the dead-letter destination for a source topic.
pub fn dlq_topic(source_topic: &str, configured: Option<&str>) -> String {
    match configured {
        Some(topic) if !topic.trim().is_empty() => topic.to_string(),
        _ => format!("{}{}", source_topic, DLQ_TOPIC_SUFFIX),
    }
}

/// Headers for a dead-lettered record.
pub fn dead_letter_headers(original: &Headers, request_id: &str) -> Headers {
    let mut headers = original.clone();
    headers.insert(REQUEST_ID_HEADER.to_string(), request_id.as_bytes().to_vec());
    headers.insert(
        DLQ_REASON_HEADER.to_string(),
        TRANSFORM_FAILED_REASON.as_bytes().to_vec(),
    );
    headers
}

/// Diagnostic body published to the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// Human-readable failure message.
    pub error: String,
    /// Extended failure detail, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub source_topic: String,
    pub target_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub transform_id: String,
    pub version: u32,
    /// Original record value, lossily decoded as UTF-8.
    pub value: String,
    /// RFC 3339 timestamp of the failure.
    pub failed_at: String,
}

impl ErrorEnvelope {
    /// Build an envelope for a record that failed under `runtime`.
    pub fn new(
        message: &InboundMessage,
        runtime: &TransformRuntime,
        error: impl Into<String>,
        stack: Option<String>,
    ) -> Self {
        Self {
            error: error.into(),
            stack,
            source_topic: message.topic.clone(),
            target_topic: runtime.target_topic.clone(),
            partition: message.partition,
            offset: message.offset,
            transform_id: runtime.id.clone(),
            version: runtime.version,
            value: String::from_utf8_lossy(&message.value).into_owned(),
            failed_at: Utc::now().to_rfc3339(),
        }
    }

    /// Serialize to the wire format.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
