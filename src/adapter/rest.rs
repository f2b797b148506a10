use super::{RemoteQuery, TypeAdapter, UpdateRequest};
use crate::cache::ReferenceCache;
use crate::core::{Entity, Result, SyncError, TransportErrorKind, key_of, scalar_to_string};
use crate::definition::{FOLDER_PATH_FIELD, TypeDefinition};
use crate::remote::{RemoteClient, list_items};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Adapter for types served by a plain REST collection endpoint:
/// `GET endpoint`, `POST endpoint`, `PATCH endpoint/{id}`, `DELETE endpoint/{id}`.
///
/// References declared on the definition are translated with the reference
/// cache, the folder id included.
pub struct RestTypeAdapter {
    definition: TypeDefinition,
}

impl RestTypeAdapter {
    pub fn new(definition: TypeDefinition) -> Self {
        Self { definition }
    }

    fn endpoint(&self) -> Result<&str> {
        self.definition.endpoint.as_deref().ok_or_else(|| {
            SyncError::Config(format!(
                "{} has no endpoint configured",
                self.definition.type_name
            ))
        })
    }

    fn item_path(&self, id: &str) -> Result<String> {
        Ok(format!("{}/{}", self.endpoint()?.trim_end_matches('/'), id))
    }

    /// Remote id of an existing entity.
    fn remote_id(&self, key: &str, entity: Option<&Entity>) -> Result<String> {
        if let Some(id) = entity.and_then(|e| key_of(e, &self.definition.id_field)) {
            return Ok(id);
        }
        if self.definition.id_field == self.definition.key_field {
            return Ok(key.to_string());
        }
        Err(SyncError::Validation(format!(
            "{} '{}' has no {}",
            self.definition.type_name, key, self.definition.id_field
        )))
    }

    fn map_not_found(&self, key: &str, err: SyncError) -> SyncError {
        match err {
            SyncError::Transport(t) if t.kind == TransportErrorKind::NotFound => {
                SyncError::not_found_on_remote(&self.definition.type_name, key)
            }
            other => other,
        }
    }

    fn into_entities(&self, items: Vec<Value>) -> Vec<Entity> {
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(entity) => Some(entity),
                other => {
                    warn!(type_name = %self.definition.type_name, item = %other, "skipping non-object item");
                    None
                }
            })
            .collect()
    }
}

/// Payload overlaid with what the API echoed back.
fn confirmed(mut sent: Entity, response: Value) -> Entity {
    if let Value::Object(echoed) = response {
        sent.extend(echoed);
    }
    sent
}

#[async_trait]
impl TypeAdapter for RestTypeAdapter {
    fn definition(&self) -> &TypeDefinition {
        &self.definition
    }

    async fn fetch(&self, remote: &dyn RemoteClient, query: &RemoteQuery) -> Result<Vec<Entity>> {
        let endpoint = self.endpoint()?;
        let mut params = query.params.clone();

        if let Some(key) = query.key.as_deref().filter(|_| self.definition.filter_by_key) {
            params.push((self.definition.key_field.clone(), key.to_string()));
            let response = remote.get(endpoint, &params).await?;
            return Ok(self.into_entities(list_items(response)));
        }

        let items = if self.definition.pagination {
            remote.get_bulk(endpoint, query.page_size, &params).await?
        } else {
            list_items(remote.get(endpoint, &params).await?)
        };
        debug!(type_name = %self.definition.type_name, count = items.len(), "fetched");
        Ok(self.into_entities(items))
    }

    async fn create(&self, remote: &dyn RemoteClient, entity: &Entity) -> Result<Entity> {
        let body = Value::Object(entity.clone());
        let response = remote.post(self.endpoint()?, &body).await?;
        Ok(confirmed(entity.clone(), response))
    }

    async fn update(&self, remote: &dyn RemoteClient, request: &UpdateRequest<'_>) -> Result<Entity> {
        let id = self.remote_id(request.key, Some(request.before))?;
        let body = Value::Object(request.after.clone());
        let response = remote
            .patch(&self.item_path(&id)?, &body)
            .await
            .map_err(|err| self.map_not_found(request.key, err))?;

        let mut entity = request.before.clone();
        entity.extend(request.after.clone());
        Ok(confirmed(entity, response))
    }

    async fn delete(&self, remote: &dyn RemoteClient, key: &str, cached: Option<&Entity>) -> Result<()> {
        if cached.is_none() && self.definition.id_field != self.definition.key_field {
            return Err(SyncError::not_found_on_remote(&self.definition.type_name, key));
        }
        let id = self.remote_id(key, cached)?;
        remote
            .delete(&self.item_path(&id)?)
            .await
            .map_err(|err| self.map_not_found(key, err))?;
        Ok(())
    }

    fn post_retrieve(&self, cache: &ReferenceCache, mut entity: Entity) -> Result<Entity> {
        if let Some(folder_field) = &self.definition.folder_field {
            if let Some(id) = entity.get(folder_field).and_then(scalar_to_string) {
                let path = cache.get_folder_path(&id)?;
                entity.remove(folder_field);
                entity.insert(FOLDER_PATH_FIELD.to_string(), Value::String(path));
            }
        }

        for rule in &self.definition.references {
            let Some(internal) = entity.get(&rule.field).and_then(scalar_to_string) else {
                continue;
            };
            let portable =
                cache.search_for_field(&rule.target_type, &internal, &rule.match_field, &rule.return_field)?;
            entity.remove(&rule.field);
            entity.insert(rule.portable_field.clone(), portable);
        }
        Ok(entity)
    }

    fn pre_deploy(&self, cache: &ReferenceCache, mut entity: Entity) -> Result<Entity> {
        if let Some(folder_field) = &self.definition.folder_field {
            if let Some(path) = entity.get(FOLDER_PATH_FIELD).and_then(scalar_to_string) {
                let id = cache.get_folder_id(&path)?;
                entity.remove(FOLDER_PATH_FIELD);
                entity.insert(folder_field.clone(), id);
            }
        }

        for rule in &self.definition.references {
            let Some(portable) = entity.get(&rule.portable_field).and_then(scalar_to_string) else {
                continue;
            };
            let internal =
                cache.search_for_field(&rule.target_type, &portable, &rule.return_field, &rule.match_field)?;
            entity.remove(&rule.portable_field);
            entity.insert(rule.field.clone(), internal);
        }
        Ok(entity)
    }

    fn cache_matched_by_name(&self, cache: &ReferenceCache, candidate: &Entity) -> Option<(String, Entity)> {
        if !self.definition.match_by_name {
            return None;
        }
        let name = key_of(candidate, &self.definition.name_field)?;
        let matches: Vec<_> = cache
            .entities(&self.definition.type_name)
            .into_iter()
            .filter(|(_, cached)| key_of(cached, &self.definition.name_field).as_deref() == Some(name.as_str()))
            .collect();

        match matches.as_slice() {
            [(key, entity)] => Some((key.to_string(), (*entity).clone())),
            [] => None,
            _ => {
                warn!(
                    type_name = %self.definition.type_name,
                    name = %name,
                    matches = matches.len(),
                    "name matches several cached entities, treating as new"
                );
                None
            }
        }
    }
}
