//! Per-type behavior plugged into the generic pipeline.
//!
//! Every metadata type is served by one [`TypeAdapter`]. The pipeline decides
//! what to call and when; adapters decide how a type talks to the remote API
//! and how its references are translated.

mod rest;

pub use rest::RestTypeAdapter;

use crate::cache::ReferenceCache;
use crate::core::{Entity, Result};
use crate::definition::TypeDefinition;
use crate::pipeline::diff;
use crate::remote::RemoteClient;
use async_trait::async_trait;

/// What to fetch from a list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteQuery {
    /// Restricts the fetch to one key when the type supports server-side filtering.
    pub key: Option<String>,
    pub page_size: usize,
    pub params: Vec<(String, String)>,
}

impl RemoteQuery {
    pub fn all(page_size: usize) -> Self {
        Self {
            key: None,
            page_size,
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    pub fn for_key(&self, key: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            ..self.clone()
        }
    }
}

/// One update call: the cached remote state and the payload to write.
#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest<'a> {
    /// Key the entity currently has remotely.
    pub key: &'a str,
    /// Target key when the update renames the entity.
    pub new_key: Option<&'a str>,
    pub before: &'a Entity,
    pub after: &'a Entity,
}

#[async_trait]
pub trait TypeAdapter: Send + Sync {
    fn definition(&self) -> &TypeDefinition;

    fn type_name(&self) -> &str {
        &self.definition().type_name
    }

    /// Raw remote entities, in API order.
    async fn fetch(&self, remote: &dyn RemoteClient, query: &RemoteQuery) -> Result<Vec<Entity>>;

    /// Creates the entity and returns its confirmed remote form.
    async fn create(&self, remote: &dyn RemoteClient, entity: &Entity) -> Result<Entity>;

    /// Updates an existing entity and returns its confirmed remote form.
    async fn update(&self, remote: &dyn RemoteClient, request: &UpdateRequest<'_>) -> Result<Entity>;

    async fn delete(&self, remote: &dyn RemoteClient, key: &str, cached: Option<&Entity>) -> Result<()>;

    /// Turns a raw remote entity into its portable form.
    fn post_retrieve(&self, _cache: &ReferenceCache, entity: Entity) -> Result<Entity> {
        Ok(entity)
    }

    /// Turns a portable entity back into the form the remote API expects.
    fn pre_deploy(&self, _cache: &ReferenceCache, entity: Entity) -> Result<Entity> {
        Ok(entity)
    }

    fn has_changed(&self, cached: &Entity, candidate: &Entity) -> bool {
        diff::has_changed(self.definition(), cached, candidate)
    }

    /// Fallback match for candidates whose key is not cached, returning the
    /// cached key and entity.
    fn cache_matched_by_name(
        &self,
        _cache: &ReferenceCache,
        _candidate: &Entity,
    ) -> Option<(String, Entity)> {
        None
    }
}
