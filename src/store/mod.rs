//! Transform definition storage.
//!
//! Definitions are owned by the administrative API; this worker only reads
//! the active ones.
//!
//! Implementations:
//! - `MongoDefinitionStore`: MongoDB collection written by the control API
//! - `MockDefinitionStore`: In-memory store for testing

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod mock;
#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use mock::MockDefinitionStore;
#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoDefinitionStore;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading transform definitions.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed transform definition {id}: {message}")]
    Malformed { id: String, message: String },

    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] ::mongodb::error::Error),
}

/// Lifecycle status of a transform definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformStatus {
    #[default]
    Draft,
    Active,
    Deprecated,
}

impl TransformStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Deprecated => "deprecated",
        }
    }
}

/// A persisted source→target topic mapping with its expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformDefinition {
    #[serde(rename = "_id")]
    pub id: String,
    pub workspace_id: String,
    pub source_topic: String,
    pub target_topic: String,
    pub version: i64,
    pub expression: String,
    #[serde(default)]
    pub status: TransformStatus,
}

impl TransformDefinition {
    /// Create an active definition.
    pub fn active(
        id: impl Into<String>,
        source_topic: impl Into<String>,
        target_topic: impl Into<String>,
        version: i64,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            workspace_id: String::new(),
            source_topic: source_topic.into(),
            target_topic: target_topic.into(),
            version,
            expression: expression.into(),
            status: TransformStatus::Active,
        }
    }

    /// Set the owning workspace.
    pub fn in_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = workspace_id.into();
        self
    }

    /// Set the lifecycle status.
    pub fn with_status(mut self, status: TransformStatus) -> Self {
        self.status = status;
        self
    }
}

/// Read access to transform definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Find active definitions, optionally scoped to a workspace, ordered by
    /// version descending.
    async fn find_active(&self, workspace_id: Option<&str>) -> Result<Vec<TransformDefinition>>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
