//! Transform registry.
//!
//! Loads active definitions, compiles them, and publishes an immutable
//! source-topic → runtime snapshot.
//!
//! ## Selection
//!
//! Definitions arrive ordered by version descending. The first definition
//! that compiles wins its source topic; later ones are dropped. A definition
//! that fails to compile is logged and skipped, so the next-highest active
//! version for the same topic takes its place.
//!
//! ## Publication
//!
//! Snapshots are never mutated after construction. [`SharedRegistry`] swaps
//! the whole snapshot atomically, so concurrent readers observe either the
//! old mapping or the new one.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{error, info, warn};

use crate::expression::{CompiledExpression, ExpressionEngine};
use crate::store::{DefinitionStore, Result, TransformDefinition};

/// A compiled, ready-to-run transform.
#[derive(Clone)]
pub struct TransformRuntime {
    pub id: String,
    pub source_topic: String,
    pub target_topic: String,
    pub version: u32,
    pub expression: String,
    pub compiled: Arc<dyn CompiledExpression>,
}

impl fmt::Debug for TransformRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRuntime")
            .field("id", &self.id)
            .field("source_topic", &self.source_topic)
            .field("target_topic", &self.target_topic)
            .field("version", &self.version)
            .field("expression", &self.expression)
            .finish()
    }
}

/// Immutable source-topic → runtime mapping.
#[derive(Debug, Default, Clone)]
pub struct RegistrySnapshot {
    transforms: HashMap<String, Arc<TransformRuntime>>,
}

impl RegistrySnapshot {
    /// Empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up the transform for a topic.
    pub fn resolve(&self, topic: &str) -> Option<Arc<TransformRuntime>> {
        self.transforms.get(topic).cloned()
    }

    /// Source topics covered by this snapshot.
    pub fn topics(&self) -> BTreeSet<String> {
        self.transforms.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl FromIterator<TransformRuntime> for RegistrySnapshot {
    /// Keeps the first runtime seen per source topic.
    fn from_iter<I: IntoIterator<Item = TransformRuntime>>(iter: I) -> Self {
        let mut transforms = HashMap::new();
        for runtime in iter {
            transforms
                .entry(runtime.source_topic.clone())
                .or_insert_with(|| Arc::new(runtime));
        }
        Self { transforms }
    }
}

/// Atomically replaceable reference to the current snapshot.
#[derive(Clone)]
pub struct SharedRegistry {
    current: Arc<ArcSwap<RegistrySnapshot>>,
}

impl SharedRegistry {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(snapshot)),
        }
    }

    /// Pin the current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Resolve against the current snapshot.
    pub fn resolve(&self, topic: &str) -> Option<Arc<TransformRuntime>> {
        self.current.load().resolve(topic)
    }

    /// Replace the current snapshot wholesale.
    pub fn install(&self, snapshot: RegistrySnapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

impl Default for SharedRegistry {
    fn default() -> Self {
        Self::new(RegistrySnapshot::empty())
    }
}

/// Loads and compiles transform definitions into snapshots.
pub struct TransformRegistry {
    store: Arc<dyn DefinitionStore>,
    engine: Arc<dyn ExpressionEngine>,
    workspace_id: Option<String>,
}

impl TransformRegistry {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        engine: Arc<dyn ExpressionEngine>,
        workspace_id: Option<String>,
    ) -> Self {
        Self {
            store,
            engine,
            workspace_id,
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    /// Query the store and build a fresh snapshot.
    ///
    /// Store failures propagate; per-definition compile failures do not.
    pub async fn load(&self) -> Result<RegistrySnapshot> {
        let definitions = self.store.find_active(self.workspace_id()).await?;
        let snapshot = self.build(definitions);

        if snapshot.is_empty() {
            warn!(
                workspace_id = ?self.workspace_id,
                "No active transforms found"
            );
        } else {
            info!(
                count = snapshot.len(),
                topics = ?snapshot.topics(),
                "Loaded transforms"
            );
        }

        Ok(snapshot)
    }

    /// Compile definitions (already ordered by version descending).
    pub fn build(&self, definitions: Vec<TransformDefinition>) -> RegistrySnapshot {
        let mut selected: HashMap<String, (String, u32)> = HashMap::new();
        let mut runtimes = Vec::new();

        for definition in definitions {
            if let Some((winner, version)) = selected.get(&definition.source_topic) {
                if i64::from(*version) == definition.version {
                    warn!(
                        source_topic = %definition.source_topic,
                        version = definition.version,
                        selected = %winner,
                        ignored = %definition.id,
                        "Competing active transforms share a version; keeping the first"
                    );
                }
                continue;
            }

            let version = match u32::try_from(definition.version) {
                Ok(v) if v > 0 => v,
                _ => {
                    warn!(
                        transform_id = %definition.id,
                        version = definition.version,
                        "Skipping transform with non-positive version"
                    );
                    continue;
                }
            };

            let compiled = match self.engine.compile(&definition.expression) {
                Ok(compiled) => compiled,
                Err(e) => {
                    error!(
                        transform_id = %definition.id,
                        source_topic = %definition.source_topic,
                        version,
                        language = self.engine.name(),
                        error = %e,
                        "Failed to compile transform expression"
                    );
                    continue;
                }
            };

            selected.insert(
                definition.source_topic.clone(),
                (definition.id.clone(), version),
            );
            runtimes.push(TransformRuntime {
                id: definition.id,
                source_topic: definition.source_topic,
                target_topic: definition.target_topic,
                version,
                expression: definition.expression,
                compiled,
            });
        }

        runtimes.into_iter().collect()
    }
}
