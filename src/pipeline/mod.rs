//! The synchronization pipeline: retrieve, resolve dependencies, upsert.

pub mod diff;
pub mod graph;
pub mod pool;
pub mod rename;
pub mod retrieve;
pub mod summary;
pub mod upsert;

pub use graph::{DependencyClosure, expand};
pub use pool::WorkerPool;
pub use rename::KeyRenameTracker;
pub use retrieve::{populate_cache, retrieve, retrieve_for_cache};
pub use summary::{DeleteOutcome, EntityFailure, RetrieveOutcome, RunReport, TypeReport, UpsertOutcome};
pub use upsert::{delete, upsert};
