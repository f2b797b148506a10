//! Include/exclude filtering of retrieved entities.

pub mod pattern;

pub use pattern::eval_like;

use crate::core::{Entity, FieldPath, Result, scalar_to_string};
use crate::definition::FOLDER_PATH_FIELD;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Field → LIKE patterns. An entity matches a rule set when, for every field
/// listed, one of the patterns matches one of the field's values.
///
/// Patterns on the resolved folder path (`r__folder_Path`) also match every
/// subfolder of the given path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FilterRules {
    #[serde(default)]
    pub include: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub exclude: BTreeMap<String, Vec<String>>,
}

impl FilterRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, field: &str, pattern: &str) -> Self {
        self.include
            .entry(field.to_string())
            .or_default()
            .push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, field: &str, pattern: &str) -> Self {
        self.exclude
            .entry(field.to_string())
            .or_default()
            .push(pattern.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Adds the run's `like` patterns as include rules.
    pub fn with_like(mut self, like: &BTreeMap<String, String>) -> Self {
        for (field, pattern) in like {
            self = self.include(field, pattern);
        }
        self
    }

    /// True when the entity survives the rules.
    pub fn keep(&self, entity: &Entity) -> Result<bool> {
        for (field, patterns) in &self.exclude {
            if field_matches(entity, field, patterns)? {
                return Ok(false);
            }
        }
        for (field, patterns) in &self.include {
            if !field_matches(entity, field, patterns)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn field_matches(entity: &Entity, field: &str, patterns: &[String]) -> Result<bool> {
    let values: Vec<String> = FieldPath::parse(field)?
        .select(entity)
        .into_iter()
        .filter_map(scalar_to_string)
        .collect();

    for value in &values {
        for pattern in patterns {
            if eval_like(value, pattern, true)? {
                return Ok(true);
            }
            if field == FOLDER_PATH_FIELD && is_subfolder(value, pattern) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn is_subfolder(path: &str, parent: &str) -> bool {
    let parent = parent.trim_end_matches('/');
    path.strip_prefix(parent)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(value: serde_json::Value) -> Entity {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_rules_keep_everything() {
        assert!(FilterRules::new().keep(&entity(json!({"a": 1}))).unwrap());
    }

    #[test]
    fn test_exclude_wins() {
        let rules = FilterRules::new()
            .include("name", "Sales%")
            .exclude("name", "%_OLD");

        assert!(rules.keep(&entity(json!({"name": "Sales Daily"}))).unwrap());
        assert!(!rules.keep(&entity(json!({"name": "Sales Daily_OLD"}))).unwrap());
        assert!(!rules.keep(&entity(json!({"name": "Marketing"}))).unwrap());
        assert!(!rules.keep(&entity(json!({"other": "Sales"}))).unwrap());
    }

    #[test]
    fn test_folder_rules_cover_subfolders() {
        let rules = FilterRules::new().exclude(FOLDER_PATH_FIELD, "Shared/Archive");

        assert!(!rules.keep(&entity(json!({"r__folder_Path": "Shared/Archive"}))).unwrap());
        assert!(!rules.keep(&entity(json!({"r__folder_Path": "Shared/Archive/2023"}))).unwrap());
        assert!(rules.keep(&entity(json!({"r__folder_Path": "Shared/Archived"}))).unwrap());
    }

    #[test]
    fn test_like_option_becomes_include() {
        let mut like = BTreeMap::new();
        like.insert("key".to_string(), "dev_%".to_string());
        let rules = FilterRules::new().with_like(&like);

        assert!(rules.keep(&entity(json!({"key": "dev_x"}))).unwrap());
        assert!(!rules.keep(&entity(json!({"key": "prod_x"}))).unwrap());
    }
}
