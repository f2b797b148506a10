//! Declarative description of metadata types.

mod registry;

pub use registry::TypeRegistry;

use crate::core::{Entity, FieldPath, Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_MAX_KEY_LENGTH: usize = 36;

/// Name of the hierarchical-location type most other types point into.
pub const FOLDER_TYPE: &str = "folder";
/// Attribute holding the resolved folder path on persisted entities.
pub const FOLDER_PATH_FIELD: &str = "r__folder_Path";

const fn default_true() -> bool {
    true
}

const fn default_max_key_length() -> usize {
    DEFAULT_MAX_KEY_LENGTH
}

/// Which pipeline stages an attribute survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPermissions {
    #[serde(default = "default_true")]
    pub is_createable: bool,
    #[serde(default = "default_true")]
    pub is_updateable: bool,
    #[serde(default = "default_true")]
    pub retrieving: bool,
    #[serde(default = "default_true")]
    pub template: bool,
    #[serde(default)]
    pub skip_validation: bool,
}

impl Default for FieldPermissions {
    fn default() -> Self {
        Self {
            is_createable: true,
            is_updateable: true,
            retrieving: true,
            template: true,
            skip_validation: false,
        }
    }
}

impl FieldPermissions {
    /// Attribute returned by the API but never written back.
    pub fn read_only() -> Self {
        Self {
            is_createable: false,
            is_updateable: false,
            ..Self::default()
        }
    }

    /// Attribute that is never persisted locally.
    pub fn hidden() -> Self {
        Self {
            retrieving: false,
            template: false,
            ..Self::default()
        }
    }
}

/// A cross-type lookup translating an internal reference into a portable one.
///
/// On retrieve, `field` is matched against `matchField` of the cached
/// `targetType` entities and replaced by their `returnField` stored under
/// `portableField`. Deploy runs the same lookup in the opposite direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRule {
    pub field: String,
    pub target_type: String,
    pub match_field: String,
    pub return_field: String,
    pub portable_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefinition {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id_field: String,
    pub key_field: String,
    pub name_field: String,
    #[serde(default)]
    pub key_is_fixed: bool,
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dependency_graph: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldPermissions>,
    #[serde(default)]
    pub ignore_fields_for_update_check: Vec<String>,
    /// Non-cacheable types are matched by an explicit id on the candidate.
    #[serde(default = "default_true")]
    pub cacheable: bool,
    #[serde(default)]
    pub match_by_name: bool,
    #[serde(default)]
    pub pagination: bool,
    /// The list endpoint accepts a key filter, so single keys are fetched server-side.
    #[serde(default)]
    pub filter_by_key: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Attribute holding the remote folder id.
    #[serde(default)]
    pub folder_field: Option<String>,
    #[serde(default)]
    pub references: Vec<ReferenceRule>,
}

impl TypeDefinition {
    pub fn new(type_name: &str, id_field: &str, key_field: &str, name_field: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            id_field: id_field.to_string(),
            key_field: key_field.to_string(),
            name_field: name_field.to_string(),
            key_is_fixed: false,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            dependencies: Vec::new(),
            dependency_graph: BTreeMap::new(),
            fields: BTreeMap::new(),
            ignore_fields_for_update_check: Vec::new(),
            cacheable: true,
            match_by_name: false,
            pagination: false,
            filter_by_key: false,
            endpoint: None,
            folder_field: None,
            references: Vec::new(),
        }
    }

    pub fn key_is_fixed(mut self, fixed: bool) -> Self {
        self.key_is_fixed = fixed;
        self
    }

    pub fn max_key_length(mut self, max: usize) -> Self {
        self.max_key_length = max;
        self
    }

    /// Declares that `paths` inside this type hold keys of `dep_type`.
    /// Also adds `dep_type` to the coarse dependency list.
    pub fn depends_on(mut self, dep_type: &str, paths: &[&str]) -> Self {
        if !self.dependencies.iter().any(|d| d == dep_type) {
            self.dependencies.push(dep_type.to_string());
        }
        self.dependency_graph
            .entry(dep_type.to_string())
            .or_default()
            .extend(paths.iter().map(|p| p.to_string()));
        self
    }

    pub fn field(mut self, path: &str, permissions: FieldPermissions) -> Self {
        self.fields.insert(path.to_string(), permissions);
        self
    }

    pub fn ignore_for_update_check(mut self, path: &str) -> Self {
        self.ignore_fields_for_update_check.push(path.to_string());
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn match_by_name(mut self, enabled: bool) -> Self {
        self.match_by_name = enabled;
        self
    }

    pub fn endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    pub fn pagination(mut self, enabled: bool) -> Self {
        self.pagination = enabled;
        self
    }

    pub fn filter_by_key(mut self, enabled: bool) -> Self {
        self.filter_by_key = enabled;
        self
    }

    pub fn folder_field(mut self, field: &str) -> Self {
        self.folder_field = Some(field.to_string());
        if !self.dependencies.iter().any(|d| d == FOLDER_TYPE) {
            self.dependencies.push(FOLDER_TYPE.to_string());
        }
        self
    }

    pub fn reference(mut self, rule: ReferenceRule) -> Self {
        if !self.dependencies.contains(&rule.target_type) {
            self.dependencies.push(rule.target_type.clone());
        }
        self.references.push(rule);
        self
    }

    /// Keys of id-keyed or fixed-key types cannot change.
    pub fn allows_rename(&self) -> bool {
        !self.key_is_fixed && self.id_field != self.key_field
    }

    /// Parsed dependency-graph paths per dependent type.
    pub fn dependency_paths(&self) -> Result<Vec<(&str, Vec<FieldPath>)>> {
        self.dependency_graph
            .iter()
            .map(|(dep_type, paths)| {
                let parsed = paths
                    .iter()
                    .map(|p| FieldPath::parse(p))
                    .collect::<Result<Vec<_>>>()?;
                Ok((dep_type.as_str(), parsed))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            SyncError::Definition(format!("{}: {}", self.type_name, reason))
        };

        if self.type_name.trim().is_empty() {
            return Err(SyncError::Definition("type name cannot be empty".into()));
        }
        for (label, value) in [
            ("idField", &self.id_field),
            ("keyField", &self.key_field),
            ("nameField", &self.name_field),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("{label} cannot be empty")));
            }
        }
        if self.max_key_length == 0 {
            return Err(invalid("maxKeyLength must be > 0".into()));
        }

        self.dependency_paths()?;
        for path in self
            .fields
            .keys()
            .chain(self.ignore_fields_for_update_check.iter())
        {
            FieldPath::parse(path)?;
        }
        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with('/') {
                return Err(invalid(format!("endpoint '{endpoint}' must start with '/'")));
            }
        }
        Ok(())
    }

    pub fn prune_for_create(&self, entity: &mut Entity) {
        self.prune(entity, |p| !p.is_createable);
    }

    pub fn prune_for_update(&self, entity: &mut Entity) {
        self.prune(entity, |p| !p.is_updateable);
    }

    pub fn prune_for_retrieve(&self, entity: &mut Entity) {
        self.prune(entity, |p| !p.retrieving);
    }

    fn prune(&self, entity: &mut Entity, drop: impl Fn(&FieldPermissions) -> bool) {
        for (path, permissions) in &self.fields {
            if !drop(permissions) {
                continue;
            }
            // paths are checked in validate()
            if let Ok(path) = FieldPath::parse(path) {
                path.remove(entity);
            }
        }
    }
}

/// Loads a JSON array of type definitions.
pub fn load_definitions(path: &Path) -> Result<Vec<TypeDefinition>> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        SyncError::Config(format!("cannot read type definitions {}: {err}", path.display()))
    })?;
    let definitions: Vec<TypeDefinition> = serde_json::from_str(&raw).map_err(|err| {
        SyncError::Config(format!("invalid type definitions {}: {err}", path.display()))
    })?;
    for definition in &definitions {
        definition.validate()?;
    }
    Ok(definitions)
}
