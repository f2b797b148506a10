//! Remote platform collaborator.
//!
//! The engine only talks to the platform through [`RemoteClient`]; transports
//! report failures as [`TransportError`]s.

mod http;

pub use http::HttpRemote;

use crate::core::{Result, TransportError, TransportErrorKind};
use async_trait::async_trait;
use serde_json::Value;

pub type QueryParams = [(String, String)];

/// A SOAP-style retrieve: object type, requested properties and an optional
/// simple filter `property operator value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRetrieve {
    pub object_type: String,
    pub properties: Vec<String>,
    pub filter: Option<SoapFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFilter {
    pub property: String,
    pub operator: String,
    pub value: String,
}

fn soap_unsupported() -> TransportError {
    TransportError::new(
        TransportErrorKind::Unsupported,
        "SOAP API is not available on this client",
    )
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn get(&self, path: &str, query: &QueryParams) -> Result<Value>;

    /// Fetches every page of a list endpoint and returns the concatenated items.
    async fn get_bulk(&self, path: &str, page_size: usize, query: &QueryParams) -> Result<Vec<Value>>;

    async fn post(&self, path: &str, body: &Value) -> Result<Value>;
    async fn patch(&self, path: &str, body: &Value) -> Result<Value>;
    async fn put(&self, path: &str, body: &Value) -> Result<Value>;
    async fn delete(&self, path: &str) -> Result<Value>;

    async fn soap_retrieve(&self, _request: &SoapRetrieve) -> Result<Vec<Value>> {
        Err(soap_unsupported().into())
    }

    async fn soap_create(&self, _object_type: &str, _properties: &Value) -> Result<Value> {
        Err(soap_unsupported().into())
    }

    async fn soap_update(&self, _object_type: &str, _properties: &Value) -> Result<Value> {
        Err(soap_unsupported().into())
    }

    async fn soap_delete(&self, _object_type: &str, _properties: &Value) -> Result<Value> {
        Err(soap_unsupported().into())
    }
}

/// Normalizes a list response: a bare array, or an object carrying `items`.
/// Anything else is treated as a single record.
pub fn list_items(response: Value) -> Vec<Value> {
    match response {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            Some(other) => vec![other],
            None if map.is_empty() => Vec::new(),
            None => vec![Value::Object(map)],
        },
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_items_shapes() {
        assert_eq!(list_items(json!([{"a": 1}])), vec![json!({"a": 1})]);
        assert_eq!(
            list_items(json!({"count": 2, "items": [{"a": 1}, {"a": 2}]})),
            vec![json!({"a": 1}), json!({"a": 2})]
        );
        assert_eq!(list_items(json!({"a": 1})), vec![json!({"a": 1})]);
        assert!(list_items(json!({})).is_empty());
        assert!(list_items(Value::Null).is_empty());
    }
}
