pub mod entity;
pub mod error;
pub mod path;

pub use entity::{Entity, EntityMap, KeysByType, key_of, scalar_matches, scalar_to_string};
pub use error::{Result, SyncError, TransportError, TransportErrorKind};
pub use path::FieldPath;
