//! Tenant-scoped reference cache.
//!
//! Holds the last known remote form of every entity per (tenant, type) and
//! resolves cross-type references by searching cached entities field to field.

use crate::core::{Entity, Result, SyncError, scalar_matches, scalar_to_string};
use crate::definition::FOLDER_TYPE;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

const FOLDER_ID_FIELD: &str = "ID";
const FOLDER_PATH_FIELD: &str = "Path";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheScope {
    tenant: String,
    type_name: String,
}

/// Entities of one (tenant, type), iterated in insertion order.
#[derive(Debug, Default)]
struct TypeCache {
    order: Vec<String>,
    items: HashMap<String, Entity>,
}

impl TypeCache {
    fn from_entries(entries: impl IntoIterator<Item = (String, Entity)>) -> Self {
        let mut cache = Self::default();
        for (key, entity) in entries {
            cache.put(key, entity);
        }
        cache
    }

    fn put(&mut self, key: String, entity: Entity) {
        if self.items.insert(key.clone(), entity).is_none() {
            self.order.push(key);
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entity> {
        let removed = self.items.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    fn iter(&self) -> impl Iterator<Item = (&String, &Entity)> {
        self.order
            .iter()
            .filter_map(|key| self.items.get(key).map(|entity| (key, entity)))
    }
}

pub struct ReferenceCache {
    tenant: String,
    folder_id_field: String,
    folder_path_field: String,
    scopes: HashMap<CacheScope, TypeCache>,
}

impl ReferenceCache {
    pub fn new(tenant: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            folder_id_field: FOLDER_ID_FIELD.to_string(),
            folder_path_field: FOLDER_PATH_FIELD.to_string(),
            scopes: HashMap::new(),
        }
    }

    /// Overrides the folder attributes used by the folder lookups.
    pub fn with_folder_fields(mut self, id_field: &str, path_field: &str) -> Self {
        self.folder_id_field = id_field.to_string();
        self.folder_path_field = path_field.to_string();
        self
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Points subsequent operations at another tenant. Entries of the previous
    /// tenant are kept.
    pub fn switch_tenant(&mut self, tenant: &str) {
        self.tenant = tenant.to_string();
    }

    fn scope(&self, type_name: &str) -> CacheScope {
        CacheScope {
            tenant: self.tenant.clone(),
            type_name: type_name.to_string(),
        }
    }

    /// Replaces the cached set of a type. No merge with previous entries.
    pub fn set_entities(
        &mut self,
        type_name: &str,
        entities: impl IntoIterator<Item = (String, Entity)>,
    ) {
        let cache = TypeCache::from_entries(entities);
        debug!(tenant = %self.tenant, type_name, count = cache.items.len(), "cache populated");
        self.scopes.insert(self.scope(type_name), cache);
    }

    pub fn is_populated(&self, type_name: &str) -> bool {
        self.scopes.contains_key(&self.scope(type_name))
    }

    pub fn invalidate(&mut self, type_name: &str) {
        self.scopes.remove(&self.scope(type_name));
    }

    pub fn len(&self, type_name: &str) -> usize {
        self.scopes
            .get(&self.scope(type_name))
            .map_or(0, |cache| cache.items.len())
    }

    pub fn get_by_key(&self, type_name: &str, key: &str) -> Option<&Entity> {
        self.scopes.get(&self.scope(type_name))?.items.get(key)
    }

    /// Cached entities of a type in insertion order.
    pub fn entities(&self, type_name: &str) -> Vec<(&str, &Entity)> {
        self.scopes
            .get(&self.scope(type_name))
            .map(|cache| cache.iter().map(|(k, e)| (k.as_str(), e)).collect())
            .unwrap_or_default()
    }

    /// Inserts or replaces one entry, keeping its position when it exists.
    pub fn put_entity(&mut self, type_name: &str, key: &str, entity: Entity) {
        let scope = self.scope(type_name);
        self.scopes
            .entry(scope)
            .or_default()
            .put(key.to_string(), entity);
    }

    pub fn remove(&mut self, type_name: &str, key: &str) -> Option<Entity> {
        let scope = self.scope(type_name);
        self.scopes.get_mut(&scope)?.remove(key)
    }

    /// Repoints an entry from `old_key` to `new_key`, rewriting its key field.
    /// Returns false when `old_key` was not cached.
    pub fn rename_key(&mut self, type_name: &str, key_field: &str, old_key: &str, new_key: &str) -> bool {
        let scope = self.scope(type_name);
        let Some(cache) = self.scopes.get_mut(&scope) else {
            return false;
        };
        let Some(mut entity) = cache.items.remove(old_key) else {
            return false;
        };
        entity.insert(key_field.to_string(), Value::String(new_key.to_string()));

        if let Some(slot) = cache.order.iter_mut().find(|k| k.as_str() == old_key) {
            *slot = new_key.to_string();
        }
        if cache.items.insert(new_key.to_string(), entity).is_some() {
            // new_key was already cached: keep a single position for it
            let mut seen = false;
            cache.order.retain(|k| {
                if k != new_key {
                    return true;
                }
                let keep = !seen;
                seen = true;
                keep
            });
        }
        true
    }

    /// Returns `return_field` of the first cached `type_name` entity whose
    /// `match_field` equals `match_value`.
    ///
    /// Zero matches fail with [`SyncError::ReferenceNotFound`]. Several
    /// matches are logged and the first inserted one wins.
    pub fn search_for_field(
        &self,
        type_name: &str,
        match_value: &str,
        match_field: &str,
        return_field: &str,
    ) -> Result<Value> {
        let mut matches = self.entities(type_name).into_iter().filter(|(_, entity)| {
            entity
                .get(match_field)
                .is_some_and(|value| scalar_matches(value, match_value))
        });

        let Some((first_key, first)) = matches.next() else {
            return Err(SyncError::reference_not_found(type_name, match_field, match_value));
        };
        let others = matches.count();
        if others > 0 {
            warn!(
                type_name,
                match_field,
                match_value,
                matches = others + 1,
                "multiple cached entities match, using '{first_key}'"
            );
        }

        first.get(return_field).cloned().ok_or_else(|| {
            SyncError::reference_not_found(type_name, return_field, format!("<missing on {first_key}>"))
        })
    }

    /// Like [`search_for_field`](Self::search_for_field) but returns the
    /// value in key form.
    pub fn search_for_key(
        &self,
        type_name: &str,
        match_value: &str,
        match_field: &str,
        return_field: &str,
    ) -> Result<String> {
        let value = self.search_for_field(type_name, match_value, match_field, return_field)?;
        scalar_to_string(&value)
            .ok_or_else(|| SyncError::reference_not_found(type_name, return_field, value))
    }

    /// Remote folder id of a local folder path.
    pub fn get_folder_id(&self, path: &str) -> Result<Value> {
        self.search_for_field(FOLDER_TYPE, path, &self.folder_path_field, &self.folder_id_field)
    }

    /// Local folder path of a remote folder id.
    pub fn get_folder_path(&self, id: &str) -> Result<String> {
        self.search_for_key(FOLDER_TYPE, id, &self.folder_id_field, &self.folder_path_field)
    }
}
