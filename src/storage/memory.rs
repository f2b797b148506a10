use super::EntityStore;
use crate::core::{Entity, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// In-process store, used for dry runs and tests.
pub struct MemoryStore {
    /// type -> key -> entity
    types: RwLock<HashMap<String, BTreeMap<String, Entity>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records persisted for a type
    pub async fn count(&self, type_name: &str) -> usize {
        self.types
            .read()
            .await
            .get(type_name)
            .map_or(0, BTreeMap::len)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn read_entity(&self, type_name: &str, key: &str) -> Result<Option<Entity>> {
        let types = self.types.read().await;
        Ok(types.get(type_name).and_then(|items| items.get(key)).cloned())
    }

    async fn write_entity(&self, type_name: &str, key: &str, entity: &Entity) -> Result<()> {
        let mut types = self.types.write().await;
        types
            .entry(type_name.to_string())
            .or_default()
            .insert(key.to_string(), entity.clone());
        Ok(())
    }

    async fn delete_entity(&self, type_name: &str, key: &str) -> Result<bool> {
        let mut types = self.types.write().await;
        Ok(types
            .get_mut(type_name)
            .is_some_and(|items| items.remove(key).is_some()))
    }

    async fn list_keys(&self, type_name: &str) -> Result<Vec<String>> {
        let types = self.types.read().await;
        Ok(types
            .get(type_name)
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default())
    }
}
