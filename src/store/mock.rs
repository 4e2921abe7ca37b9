//! Mock definition store for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DefinitionStore, Result, StoreError, TransformDefinition, TransformStatus};

/// In-memory definition store.
///
/// Applies the same filter and ordering a real store does: active only,
/// optional workspace scope, version descending, then id ascending.
#[derive(Default)]
pub struct MockDefinitionStore {
    definitions: RwLock<Vec<TransformDefinition>>,
    fail_on_find: RwLock<bool>,
    find_calls: RwLock<usize>,
    closed: RwLock<bool>,
}

impl MockDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(definitions: Vec<TransformDefinition>) -> Self {
        Self {
            definitions: RwLock::new(definitions),
            ..Default::default()
        }
    }

    pub async fn insert(&self, definition: TransformDefinition) {
        self.definitions.write().await.push(definition);
    }

    pub async fn replace(&self, definitions: Vec<TransformDefinition>) {
        *self.definitions.write().await = definitions;
    }

    pub async fn set_fail_on_find(&self, fail: bool) {
        *self.fail_on_find.write().await = fail;
    }

    pub async fn find_calls(&self) -> usize {
        *self.find_calls.read().await
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

#[async_trait]
impl DefinitionStore for MockDefinitionStore {
    async fn find_active(&self, workspace_id: Option<&str>) -> Result<Vec<TransformDefinition>> {
        *self.find_calls.write().await += 1;
        if *self.fail_on_find.read().await {
            return Err(StoreError::Unavailable("Mock find failure".to_string()));
        }

        let mut found: Vec<TransformDefinition> = self
            .definitions
            .read()
            .await
            .iter()
            .filter(|d| d.status == TransformStatus::Active)
            .filter(|d| workspace_id.map_or(true, |ws| d.workspace_id == ws))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn close(&self) -> Result<()> {
        *self.closed.write().await = true;
        Ok(())
    }
}
