//! Retrieval into portable form, filtering and persistence

mod common;

use common::*;
use mdsync::core::TransportErrorKind;
use mdsync::{EngineConfig, EntityStore, FilterRules, RunOptions, SyncEngine, SyncError};
use serde_json::json;
use std::sync::Arc;

fn seeded_remote() -> ScriptedRemote {
    let remote = ScriptedRemote::new();
    remote.seed(
        "/folders",
        vec![
            json!({"ID": 1, "Name": "Queries", "Path": "Queries"}),
            json!({"ID": 2, "Name": "Archive", "Path": "Queries/Archive"}),
        ],
    );
    remote.seed(
        "/dataextensions",
        vec![json!({"id": "de-1", "key": "Customers", "name": "Customers", "categoryId": 1})],
    );
    remote.seed(
        "/queries",
        vec![
            json!({"id": "q-1", "key": "daily", "name": "Daily", "categoryId": 1, "targetId": "de-1"}),
            json!({"id": "q-2", "key": "old", "name": "Old", "categoryId": 2, "targetId": "de-1"}),
            json!({"id": "q-3", "key": "broken", "name": "Broken", "categoryId": 1, "targetId": "de-x"}),
        ],
    );
    remote
}

fn engine(remote: Arc<ScriptedRemote>, store: Arc<mdsync::MemoryStore>) -> SyncEngine {
    engine_with(remote, store, linked_query_definition())
}

fn engine_with(
    remote: Arc<ScriptedRemote>,
    store: Arc<mdsync::MemoryStore>,
    query: mdsync::TypeDefinition,
) -> SyncEngine {
    let registry = registry(vec![folder_definition(), data_extension_definition(), query]);
    SyncEngine::new(EngineConfig::new("acme"), registry, remote, store)
}

#[tokio::test]
async fn test_retrieve_resolves_references() {
    let remote = Arc::new(seeded_remote());
    let store = Arc::new(mdsync::MemoryStore::new());
    let mut engine = engine(remote.clone(), store.clone());

    let outcome = engine.retrieve("query", None).await.unwrap();

    assert_eq!(outcome.items.len(), 2);
    let daily = &outcome.items["daily"];
    assert_eq!(daily["r__folder_Path"], json!("Queries"));
    assert_eq!(daily["r__dataExtension_key"], json!("Customers"));
    assert!(!daily.contains_key("categoryId"));
    assert!(!daily.contains_key("targetId"));

    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].key, "broken");

    assert!(store.read_entity("query", "daily").await.unwrap().is_some());
    assert!(store.read_entity("query", "broken").await.unwrap().is_none());
}

#[tokio::test]
async fn test_retrieve_applies_folder_and_like_filters() {
    let remote = Arc::new(seeded_remote());
    let store = Arc::new(mdsync::MemoryStore::new());
    let mut engine = engine(remote, store)
        .with_filters(FilterRules::new().exclude("r__folder_Path", "Queries/Archive"));

    let outcome = engine.retrieve("query", None).await.unwrap();
    assert_eq!(outcome.items.keys().collect::<Vec<_>>(), vec!["daily"]);
    assert_eq!(outcome.filtered, 1);

    let remote = Arc::new(seeded_remote());
    let store = Arc::new(mdsync::MemoryStore::new());
    let mut engine = engine_with(remote, store, linked_query_definition())
        .with_options(RunOptions::new().like("name", "O%"))
        .unwrap();

    let outcome = engine.retrieve("query", None).await.unwrap();
    assert_eq!(outcome.items.keys().collect::<Vec<_>>(), vec!["old"]);
}

#[tokio::test]
async fn test_transport_error_aborts_retrieve() {
    let remote = seeded_remote();
    remote.fail("GET /queries", TransportErrorKind::Server);
    let store = Arc::new(mdsync::MemoryStore::new());
    let mut engine = engine(Arc::new(remote), store.clone());

    let err = engine.retrieve("query", None).await.unwrap_err();

    assert!(matches!(err, SyncError::Transport(_)));
    assert_eq!(store.count("query").await, 0);
}

#[tokio::test]
async fn test_key_filter_fetches_server_side() {
    let remote = Arc::new(seeded_remote());
    let store = Arc::new(mdsync::MemoryStore::new());
    let mut engine = engine_with(
        remote.clone(),
        store,
        linked_query_definition().filter_by_key(true),
    );

    let keys = vec!["daily".to_string()];
    let outcome = engine.retrieve("query", Some(&keys)).await.unwrap();

    assert_eq!(outcome.items.keys().collect::<Vec<_>>(), vec!["daily"]);
    assert!(outcome.failed.is_empty());
}

#[tokio::test]
async fn test_key_filter_without_server_support() {
    let remote = Arc::new(seeded_remote());
    let store = Arc::new(mdsync::MemoryStore::new());
    let mut engine = engine(remote, store);

    let keys = vec!["old".to_string(), "absent".to_string()];
    let outcome = engine.retrieve("query", Some(&keys)).await.unwrap();

    assert_eq!(outcome.items.keys().collect::<Vec<_>>(), vec!["old"]);
}

#[tokio::test]
async fn test_deploy_resolves_dependencies_first() {
    let remote = ScriptedRemote::new();
    remote.seed("/folders", vec![json!({"ID": 1, "Name": "Queries", "Path": "Queries"})]);
    let remote = Arc::new(remote);
    let store = Arc::new(mdsync::MemoryStore::new());
    store
        .write_entity(
            "query",
            "daily",
            &entity(json!({
                "key": "daily",
                "name": "Daily",
                "r__folder_Path": "Queries",
                "r__dataExtension_key": "Customers"
            })),
        )
        .await
        .unwrap();
    store
        .write_entity(
            "dataExtension",
            "Customers",
            &entity(json!({"key": "Customers", "name": "Customers", "r__folder_Path": "Queries"})),
        )
        .await
        .unwrap();
    let mut engine = engine(remote.clone(), store);

    let report = engine.deploy("query", None).await.unwrap();

    assert_eq!(report.types.len(), 2);
    assert_eq!(report.failures(), 0);

    let log = remote.log();
    let de_post = log.iter().position(|c| c == "POST /dataextensions").unwrap();
    let query_post = log.iter().position(|c| c == "POST /queries").unwrap();
    assert!(de_post < query_post);

    let query = &remote.items("/queries")[0];
    let data_extension = &remote.items("/dataextensions")[0];
    assert_eq!(query["targetId"], data_extension["id"]);
    assert_eq!(query["categoryId"], json!(1));
    assert!(!query.contains_key("r__folder_Path"));
}
