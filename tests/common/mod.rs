//! Shared fixtures: a scripted in-memory remote and ready-made definitions.

#![allow(dead_code)]

use async_trait::async_trait;
use mdsync::remote::QueryParams;
use mdsync::{
    EngineConfig, Entity, EntityStore, MemoryStore, ReferenceRule, RemoteClient, Result,
    RunContext, SyncError, TransportError, TransportErrorKind, TypeDefinition, TypeRegistry,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn entity(value: Value) -> Entity {
    value.as_object().cloned().unwrap()
}

/// Platform double serving REST collections from memory.
///
/// Creates echo the body with a generated `id`; updates merge into the stored
/// item; every call is logged as `"METHOD path"`.
#[derive(Default)]
pub struct ScriptedRemote {
    collections: Mutex<BTreeMap<String, Vec<Entity>>>,
    failures: Mutex<HashMap<String, TransportError>>,
    log: Mutex<Vec<String>>,
    latency: Mutex<Duration>,
    next_id: AtomicUsize,
    inflight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    /// Seeds a collection, as if the entities already existed remotely.
    pub fn seed(&self, path: &str, items: Vec<Value>) {
        let items = items.into_iter().map(entity).collect();
        self.collections
            .lock()
            .unwrap()
            .insert(path.to_string(), items);
    }

    /// Fails every call whose target matches: `"POST /queries#key"` for a
    /// create of `key`, `"PATCH /queries/id"`, `"GET /queries"`, ...
    pub fn fail(&self, target: &str, kind: TransportErrorKind) {
        let status = match kind {
            TransportErrorKind::Auth => 401,
            TransportErrorKind::NotFound => 404,
            _ => 500,
        };
        self.failures.lock().unwrap().insert(
            target.to_string(),
            TransportError::new(kind, format!("scripted failure on {target}")).with_status(status),
        );
    }

    pub fn items(&self, path: &str) -> Vec<Entity> {
        self.collections
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn calls(&self, method: &str) -> usize {
        let prefix = format!("{method} ");
        self.log().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    pub fn peak_inflight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: String, target: &str) -> Result<()> {
        self.log.lock().unwrap().push(call);
        let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.inflight.fetch_sub(1, Ordering::SeqCst);

        match self.failures.lock().unwrap().get(target) {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }

    fn not_found(path: &str) -> mdsync::SyncError {
        TransportError::new(TransportErrorKind::NotFound, format!("{path} not found"))
            .with_status(404)
            .into()
    }

    fn split_item_path(path: &str) -> (&str, &str) {
        path.rsplit_once('/').unwrap_or((path, ""))
    }
}

#[async_trait]
impl RemoteClient for ScriptedRemote {
    async fn get(&self, path: &str, query: &QueryParams) -> Result<Value> {
        self.enter(format!("GET {path}"), &format!("GET {path}")).await?;
        let items: Vec<Value> = self
            .items(path)
            .into_iter()
            .filter(|item| {
                query.iter().all(|(field, value)| {
                    item.get(field)
                        .map(|v| v.as_str().map_or(v.to_string(), str::to_string) == *value)
                        .unwrap_or(false)
                })
            })
            .map(Value::Object)
            .collect();
        Ok(json!({ "count": items.len(), "items": items }))
    }

    async fn get_bulk(&self, path: &str, _page_size: usize, query: &QueryParams) -> Result<Vec<Value>> {
        let response = self.get(path, query).await?;
        Ok(mdsync::remote::list_items(response))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let key = body.get("key").and_then(Value::as_str).unwrap_or_default();
        self.enter(format!("POST {path}"), &format!("POST {path}#{key}"))
            .await?;

        let mut created = body.as_object().cloned().unwrap_or_default();
        if !created.contains_key("id") {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            created.insert("id".into(), json!(format!("id-{id}")));
        }
        self.collections
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push(created.clone());
        Ok(Value::Object(created))
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        self.enter(format!("PATCH {path}"), &format!("PATCH {path}")).await?;
        let (collection, id) = Self::split_item_path(path);

        let mut collections = self.collections.lock().unwrap();
        let item = collections
            .get_mut(collection)
            .and_then(|items| items.iter_mut().find(|i| i.get("id") == Some(&json!(id))))
            .ok_or_else(|| Self::not_found(path))?;
        if let Some(fields) = body.as_object() {
            item.extend(fields.clone());
        }
        Ok(Value::Object(item.clone()))
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.patch(path, body).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.enter(format!("DELETE {path}"), &format!("DELETE {path}")).await?;
        let (collection, id) = Self::split_item_path(path);

        let mut collections = self.collections.lock().unwrap();
        let items = collections
            .get_mut(collection)
            .ok_or_else(|| Self::not_found(path))?;
        let before = items.len();
        items.retain(|i| i.get("id") != Some(&json!(id)));
        if items.len() == before {
            return Err(Self::not_found(path));
        }
        Ok(Value::Null)
    }
}

/// In-memory store whose writes or deletes fail for chosen keys.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_writes: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes_to(&self, key: &str) {
        self.failing_writes.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_deletes_of(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn read_entity(&self, type_name: &str, key: &str) -> Result<Option<Entity>> {
        self.inner.read_entity(type_name, key).await
    }

    async fn write_entity(&self, type_name: &str, key: &str, entity: &Entity) -> Result<()> {
        if self.failing_writes.lock().unwrap().contains(key) {
            return Err(SyncError::Persistence(format!("disk full writing {key}")));
        }
        self.inner.write_entity(type_name, key, entity).await
    }

    async fn delete_entity(&self, type_name: &str, key: &str) -> Result<bool> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(SyncError::Persistence(format!("permission denied removing {key}")));
        }
        self.inner.delete_entity(type_name, key).await
    }

    async fn list_keys(&self, type_name: &str) -> Result<Vec<String>> {
        self.inner.list_keys(type_name).await
    }
}

pub fn query_definition() -> TypeDefinition {
    TypeDefinition::new("query", "id", "key", "name")
        .endpoint("/queries")
        .field("id", mdsync::FieldPermissions::read_only())
}

pub fn folder_definition() -> TypeDefinition {
    TypeDefinition::new("folder", "ID", "ID", "Name").endpoint("/folders")
}

pub fn data_extension_definition() -> TypeDefinition {
    TypeDefinition::new("dataExtension", "id", "key", "name")
        .endpoint("/dataextensions")
        .field("id", mdsync::FieldPermissions::read_only())
        .folder_field("categoryId")
}

/// Query type whose `targetId` points at a data extension id.
pub fn linked_query_definition() -> TypeDefinition {
    query_definition()
        .folder_field("categoryId")
        .reference(ReferenceRule {
            field: "targetId".into(),
            target_type: "dataExtension".into(),
            match_field: "id".into(),
            return_field: "key".into(),
            portable_field: "r__dataExtension_key".into(),
        })
        .depends_on("dataExtension", &["r__dataExtension_key"])
}

pub fn registry(definitions: Vec<TypeDefinition>) -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::with_rest_adapters(definitions).unwrap())
}

pub struct Harness {
    pub remote: Arc<ScriptedRemote>,
    pub store: Arc<MemoryStore>,
    pub ctx: RunContext,
}

pub fn harness(definitions: Vec<TypeDefinition>, remote: ScriptedRemote) -> Harness {
    harness_with_config(definitions, remote, EngineConfig::new("acme"))
}

pub fn harness_with_config(
    definitions: Vec<TypeDefinition>,
    remote: ScriptedRemote,
    config: EngineConfig,
) -> Harness {
    let remote = Arc::new(remote);
    let store = Arc::new(MemoryStore::new());
    let ctx = RunContext::new(config, registry(definitions), remote.clone(), store.clone());
    Harness { remote, store, ctx }
}
