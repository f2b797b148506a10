// ============================================================================
// mdsync Library
// ============================================================================

pub mod adapter;
pub mod cache;
pub mod config;
pub mod context;
pub mod core;
pub mod definition;
pub mod filter;
pub mod pipeline;
pub mod remote;
pub mod storage;
mod engine;

// Re-export main types for convenience
pub use adapter::{RemoteQuery, RestTypeAdapter, TypeAdapter, UpdateRequest};
pub use cache::ReferenceCache;
pub use config::{EngineConfig, RunOptions};
pub use context::RunContext;
pub use core::{
    Entity, EntityMap, FieldPath, KeysByType, Result, SyncError, TransportError,
    TransportErrorKind,
};
pub use definition::{FieldPermissions, ReferenceRule, TypeDefinition, TypeRegistry};
pub use engine::SyncEngine;
pub use filter::FilterRules;
pub use pipeline::{
    DeleteOutcome, DependencyClosure, KeyRenameTracker, RetrieveOutcome, RunReport, UpsertOutcome,
};
pub use remote::{HttpRemote, RemoteClient};
pub use storage::{EntityStore, FileStore, MemoryStore};
