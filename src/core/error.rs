use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Credentials rejected or expired. Never recoverable within a run.
    Auth,
    NotFound,
    Server,
    Timeout,
    Request,
    Unsupported,
}

/// Failure reported by a remote collaborator.
///
/// `details` holds the structured sub-errors of the response body; they are
/// rendered as one bullet per line below the message.
#[derive(Debug, Clone, Error)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
    pub details: Vec<String>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    /// Fatal errors abort the whole run instead of failing one entity.
    pub fn is_fatal(&self) -> bool {
        self.kind == TransportErrorKind::Auth
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {})", self.message, status)?,
            None => write!(f, "{}", self.message)?,
        }
        for detail in &self.details {
            write!(f, "\n • {}", detail)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("{type_name}: no cached entity with {field} = '{value}'")]
    ReferenceNotFound {
        type_name: String,
        field: String,
        value: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{type_name} '{key}' not found on remote")]
    NotFoundOnRemote { type_name: String, key: String },

    #[error("Unknown metadata type '{0}'")]
    UnknownType(String),

    #[error("Invalid type definition: {0}")]
    Definition(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    pub fn reference_not_found(type_name: &str, field: &str, value: impl fmt::Display) -> Self {
        Self::ReferenceNotFound {
            type_name: type_name.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn not_found_on_remote(type_name: &str, key: &str) -> Self {
        Self::NotFoundOnRemote {
            type_name: type_name.to_string(),
            key: key.to_string(),
        }
    }

    /// Only fatal transport errors cross the per-entity boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(err) if err.is_fatal())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Internal(err.to_string())
    }
}
