use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// One configuration record of a given type: an open attribute map.
pub type Entity = Map<String, Value>;

/// Entities of one type keyed by their portable key.
pub type EntityMap = BTreeMap<String, Entity>;

/// Keys grouped by metadata type.
pub type KeysByType = BTreeMap<String, BTreeSet<String>>;

/// Renders a scalar JSON value the way it is used as a key or lookup value.
///
/// Strings are taken verbatim, numbers and booleans by their textual form.
/// Null, arrays and objects have no key form.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reads `field` of `entity` as a key string, trimmed. Empty values count as absent.
pub fn key_of(entity: &Entity, field: &str) -> Option<String> {
    entity
        .get(field)
        .and_then(scalar_to_string)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
}

/// Compares a stored value against a lookup value through their key form,
/// so that a numeric id `42` matches the string `"42"`.
pub fn scalar_matches(value: &Value, expected: &str) -> bool {
    scalar_to_string(value).is_some_and(|s| s == expected)
}
