//! MongoDB definition store.
//!
//! Reads the `jsonatatransforms` collection maintained by the control API.
//! The collection and its indexes belong to the writer; this store never
//! creates or modifies them.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, DateTime, Document};
use mongodb::{Client, Collection};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{DefinitionStore, Result, StoreError, TransformDefinition, TransformStatus};

/// Collection name.
pub(crate) const TRANSFORMS_COLLECTION: &str = "jsonatatransforms";

/// Persisted document shape. Only the runtime fields are surfaced.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
struct TransformDocument {
    #[serde(rename = "_id")]
    id: String,
    workspace_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    version: Bson,
    expression: String,
    source_topic: String,
    target_topic: String,
    #[serde(default)]
    source_schema_id: Option<i64>,
    #[serde(default)]
    target_schema_id: Option<i64>,
    #[serde(default)]
    status: TransformStatus,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    updated_by: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime>,
    #[serde(default)]
    updated_at: Option<DateTime>,
}

impl TryFrom<TransformDocument> for TransformDefinition {
    type Error = StoreError;

    fn try_from(doc: TransformDocument) -> Result<Self> {
        let version = match doc.version {
            Bson::Int32(v) => i64::from(v),
            Bson::Int64(v) => v,
            Bson::Double(v) if v.fract() == 0.0 => v as i64,
            other => {
                return Err(StoreError::Malformed {
                    id: doc.id,
                    message: format!("version is not an integer: {}", other),
                })
            }
        };

        Ok(Self {
            id: doc.id,
            workspace_id: doc.workspace_id,
            source_topic: doc.source_topic,
            target_topic: doc.target_topic,
            version,
            expression: doc.expression,
            status: doc.status,
        })
    }
}

/// Build the query filter for active definitions.
pub(crate) fn active_filter(workspace_id: Option<&str>) -> Document {
    let mut filter = doc! { "status": TransformStatus::Active.as_str() };
    if let Some(ws) = workspace_id {
        filter.insert("workspaceId", ws);
    }
    filter
}

/// Decode fetched documents, skipping malformed ones.
pub(crate) fn decode_definitions(documents: Vec<Document>) -> Vec<TransformDefinition> {
    documents
        .into_iter()
        .filter_map(|raw| match decode_definition(raw) {
            Ok(definition) => Some(definition),
            Err(e) => {
                warn!(error = %e, "Skipping malformed transform definition");
                None
            }
        })
        .collect()
}

fn decode_definition(raw: Document) -> Result<TransformDefinition> {
    let id = match raw.get("_id") {
        Some(Bson::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => "<missing _id>".to_string(),
    };
    let document: TransformDocument =
        mongodb::bson::from_document(raw).map_err(|e| StoreError::Malformed {
            id,
            message: e.to_string(),
        })?;
    TransformDefinition::try_from(document)
}

/// MongoDB implementation of DefinitionStore.
pub struct MongoDefinitionStore {
    client: Client,
    transforms: Collection<Document>,
}

impl MongoDefinitionStore {
    /// Wrap an existing client.
    pub fn new(client: &Client, database_name: &str) -> Self {
        let transforms = client
            .database(database_name)
            .collection(TRANSFORMS_COLLECTION);

        Self {
            client: client.clone(),
            transforms,
        }
    }

    /// Connect and verify the server is reachable.
    pub async fn connect(uri: &str, database_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        client
            .database(database_name)
            .run_command(doc! { "ping": 1 })
            .await?;

        info!(database = %database_name, "Connected to MongoDB");

        Ok(Self::new(&client, database_name))
    }
}

#[async_trait]
impl DefinitionStore for MongoDefinitionStore {
    async fn find_active(&self, workspace_id: Option<&str>) -> Result<Vec<TransformDefinition>> {
        let documents: Vec<Document> = self
            .transforms
            .find(active_filter(workspace_id))
            .sort(doc! { "version": -1, "_id": 1 })
            .await?
            .try_collect()
            .await?;

        debug!(
            count = documents.len(),
            workspace_id = ?workspace_id,
            "Fetched active transform definitions"
        );

        Ok(decode_definitions(documents))
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
