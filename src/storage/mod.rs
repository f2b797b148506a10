//! Local persistence of retrieved entities.
//!
//! One JSON record per (type, key). The engine reads and writes through
//! [`EntityStore`] and stays agnostic of the layout.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::core::{Entity, EntityMap, Result, key_of};
use async_trait::async_trait;
use tracing::warn;

/// A persisted record whose file name disagrees with its key field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMismatch {
    pub file_key: String,
    pub entity_key: Option<String>,
}

/// Result of loading every persisted entity of a type.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub items: EntityMap,
    pub mismatches: Vec<KeyMismatch>,
    pub unreadable: Vec<(String, String)>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// `Ok(None)` when nothing is persisted under the key.
    async fn read_entity(&self, type_name: &str, key: &str) -> Result<Option<Entity>>;

    async fn write_entity(&self, type_name: &str, key: &str, entity: &Entity) -> Result<()>;

    /// Returns whether anything was deleted.
    async fn delete_entity(&self, type_name: &str, key: &str) -> Result<bool>;

    async fn list_keys(&self, type_name: &str) -> Result<Vec<String>>;

    /// Loads all entities of a type, validating that each record is filed
    /// under its own `key_field` value. Mismatched and unreadable records are
    /// reported and left out; they never fail the load.
    async fn load_all(&self, type_name: &str, key_field: &str) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for file_key in self.list_keys(type_name).await? {
            let entity = match self.read_entity(type_name, &file_key).await {
                Ok(Some(entity)) => entity,
                Ok(None) => continue,
                Err(err) => {
                    warn!(type_name, key = %file_key, error = %err, "unreadable record skipped");
                    report.unreadable.push((file_key, err.to_string()));
                    continue;
                }
            };

            let entity_key = key_of(&entity, key_field);
            if entity_key.as_deref() != Some(file_key.as_str()) {
                warn!(
                    type_name,
                    file_key = %file_key,
                    entity_key = ?entity_key,
                    "file name does not match {key_field}"
                );
                report.mismatches.push(KeyMismatch {
                    file_key,
                    entity_key,
                });
                continue;
            }
            report.items.insert(file_key, entity);
        }
        Ok(report)
    }
}
