//! Whole commands over the on-disk store

mod common;

use common::*;
use mdsync::{EngineConfig, EntityStore, FileStore, KeysByType, SyncEngine};
use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

fn remote() -> ScriptedRemote {
    let remote = ScriptedRemote::new();
    remote.seed(
        "/folders",
        vec![json!({"ID": 1, "Name": "Queries", "Path": "Queries"})],
    );
    remote.seed(
        "/dataextensions",
        vec![json!({"id": "de-1", "key": "Customers", "name": "Customers", "categoryId": 1})],
    );
    remote.seed(
        "/queries",
        vec![json!({"id": "q-1", "key": "daily/sync", "name": "Daily", "categoryId": 1, "targetId": "de-1"})],
    );
    remote
}

fn engine(remote: Arc<ScriptedRemote>, store: Arc<FileStore>) -> SyncEngine {
    let registry = registry(vec![
        folder_definition(),
        data_extension_definition(),
        linked_query_definition(),
    ]);
    SyncEngine::new(EngineConfig::new("acme"), registry, remote, store)
}

#[tokio::test]
async fn test_retrieve_writes_tenant_tree() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path(), "acme", "default"));
    let mut engine = engine(Arc::new(remote()), store.clone());

    engine.retrieve("dataExtension", None).await.unwrap();
    engine.retrieve("query", None).await.unwrap();

    assert!(dir.path().join("acme/default/dataExtension/Customers.json").exists());
    assert!(dir.path().join("acme/default/query/daily%2Fsync.json").exists());

    let stored = store.read_entity("query", "daily/sync").await.unwrap().unwrap();
    assert_eq!(stored["r__dataExtension_key"], json!("Customers"));
}

#[tokio::test]
async fn test_deps_reads_from_disk() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path(), "acme", "default"));
    let mut engine = engine(Arc::new(remote()), store);
    engine.retrieve("dataExtension", None).await.unwrap();
    engine.retrieve("query", None).await.unwrap();

    let mut seed = KeysByType::new();
    seed.entry("query".into()).or_default().insert("daily/sync".into());
    let closure = engine.deps(&seed).await.unwrap();

    assert!(closure.contains("query", "daily/sync"));
    assert!(closure.contains("dataExtension", "Customers"));
    assert_eq!(closure.not_found_count(), 0);
}

#[tokio::test]
async fn test_redeploy_after_retrieve_changes_nothing() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path(), "acme", "default"));
    let remote = Arc::new(remote());
    let mut engine = engine(remote.clone(), store);
    engine.retrieve("query", None).await.unwrap();

    let report = engine.deploy("query", None).await.unwrap();

    assert_eq!(report.failures(), 0);
    assert_eq!(remote.calls("POST"), 0);
    assert_eq!(remote.calls("PATCH"), 0);
}

#[tokio::test]
async fn test_delete_removes_file() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path(), "acme", "default"));
    let remote = Arc::new(remote());
    let mut engine = engine(remote.clone(), store);
    engine.retrieve("query", None).await.unwrap();

    let outcome = engine.delete("query", &["daily/sync".to_string()]).await.unwrap();

    assert_eq!(outcome.deleted, vec!["daily/sync".to_string()]);
    assert!(!dir.path().join("acme/default/query/daily%2Fsync.json").exists());
    assert!(remote.items("/queries").is_empty());
}

#[tokio::test]
async fn test_load_all_skips_misfiled_records() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path(), "acme", "default");
    store
        .write_entity("query", "a", &entity(json!({"key": "a"})))
        .await
        .unwrap();
    store
        .write_entity("query", "b", &entity(json!({"key": "not-b"})))
        .await
        .unwrap();

    let report = store.load_all("query", "key").await.unwrap();

    assert_eq!(report.items.keys().collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(report.mismatches.len(), 1);
    assert_eq!(report.mismatches[0].file_key, "b");
    assert_eq!(report.mismatches[0].entity_key.as_deref(), Some("not-b"));
}

#[tokio::test]
async fn test_deploy_by_key_reports_misfiled_records() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path(), "acme", "default"));
    store
        .write_entity("query", "a", &entity(json!({"key": "a", "name": "A"})))
        .await
        .unwrap();
    store
        .write_entity("query", "b", &entity(json!({"key": "not-b", "name": "B"})))
        .await
        .unwrap();
    let remote = Arc::new(remote());
    let mut engine = engine(remote.clone(), store);

    let keys = vec!["a".to_string(), "b".to_string()];
    let report = engine.deploy("query", Some(&keys)).await.unwrap();

    assert_eq!(report.failures(), 1);
    assert_eq!(remote.calls("POST"), 1);
    assert!(remote.items("/queries").iter().all(|q| q["key"] != json!("not-b")));

    let only_misfiled = vec!["b".to_string()];
    let err = engine.deploy("query", Some(&only_misfiled)).await.unwrap_err();
    assert!(matches!(err, mdsync::SyncError::Validation(_)));
}
