//! Canonical entity directory, read per namespace.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use graphmind_core::{CanonicalEntity, TenantNamespace};
use parking_lot::RwLock;

use crate::error::{QueryError, Result};

/// Read-only source of a tenant's canonical entities.
///
/// Implementations must only ever return entities of the namespace asked for.
#[async_trait]
pub trait EntityDirectory: Send + Sync {
    async fn entities(&self, namespace: &TenantNamespace) -> Result<Vec<CanonicalEntity>>;
}

/// In-memory directory keyed by namespace.
#[derive(Default)]
pub struct MemoryDirectory {
    by_namespace: RwLock<HashMap<TenantNamespace, Vec<CanonicalEntity>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `{ "<namespace>": [ {id, type, name, aliases} ] }` from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            QueryError::Input(format!(
                "cannot read entity directory {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: HashMap<TenantNamespace, Vec<CanonicalEntity>> = serde_json::from_str(raw)?;
        let count: usize = parsed.values().map(Vec::len).sum();
        tracing::info!(
            namespaces = parsed.len(),
            entities = count,
            "Entity directory loaded"
        );
        Ok(Self {
            by_namespace: RwLock::new(parsed),
        })
    }

    /// Replace a namespace's entities.
    pub fn insert(&self, namespace: TenantNamespace, entities: Vec<CanonicalEntity>) {
        self.by_namespace.write().insert(namespace, entities);
    }
}

#[async_trait]
impl EntityDirectory for MemoryDirectory {
    async fn entities(&self, namespace: &TenantNamespace) -> Result<Vec<CanonicalEntity>> {
        Ok(self
            .by_namespace
            .read()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}
