use super::TypeDefinition;
use crate::adapter::{RestTypeAdapter, TypeAdapter};
use crate::core::{Result, SyncError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps each metadata type name to the adapter serving it.
pub struct TypeRegistry {
    adapters: BTreeMap<String, Arc<dyn TypeAdapter>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            adapters: BTreeMap::new(),
        }
    }

    /// Registers an adapter under the type name of its definition.
    pub fn register(&mut self, adapter: Arc<dyn TypeAdapter>) -> Result<()> {
        let definition = adapter.definition();
        definition.validate()?;

        let type_name = definition.type_name.clone();
        if self.adapters.contains_key(&type_name) {
            return Err(SyncError::Definition(format!(
                "type '{type_name}' registered twice"
            )));
        }
        debug!(type_name = %type_name, "registered type adapter");
        self.adapters.insert(type_name, adapter);
        Ok(())
    }

    /// Registry serving every definition through the generic REST adapter.
    pub fn with_rest_adapters(definitions: Vec<TypeDefinition>) -> Result<Self> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(Arc::new(RestTypeAdapter::new(definition)))?;
        }
        Ok(registry)
    }

    pub fn adapter(&self, type_name: &str) -> Result<Arc<dyn TypeAdapter>> {
        self.adapters
            .get(type_name)
            .cloned()
            .ok_or_else(|| SyncError::UnknownType(type_name.to_string()))
    }

    pub fn definition(&self, type_name: &str) -> Result<&TypeDefinition> {
        self.adapters
            .get(type_name)
            .map(|adapter| adapter.definition())
            .ok_or_else(|| SyncError::UnknownType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.adapters.contains_key(type_name)
    }

    pub fn list_types(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    /// Orders `types` so that every type comes after the types it declares in
    /// `dependencies`. Dependencies outside the requested set are ignored.
    /// Cyclic leftovers are appended by name with a warning.
    pub fn deploy_order<'a>(&self, types: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>> {
        let requested: BTreeSet<&str> = types.into_iter().collect();

        let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for &type_name in &requested {
            let definition = self.definition(type_name)?;
            let deps = definition
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|dep| *dep != type_name && requested.contains(dep))
                .collect();
            pending.insert(type_name, deps);
        }

        let mut ordered = Vec::with_capacity(pending.len());
        loop {
            let ready: Vec<&str> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();
            if ready.is_empty() {
                break;
            }
            for name in ready {
                pending.remove(name);
                for deps in pending.values_mut() {
                    deps.remove(name);
                }
                ordered.push(name.to_string());
            }
        }

        if !pending.is_empty() {
            let cyclic: Vec<&str> = pending.keys().copied().collect();
            warn!(types = ?cyclic, "cyclic type dependencies, deploying in name order");
            ordered.extend(cyclic.into_iter().map(str::to_string));
        }
        Ok(ordered)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(definitions: Vec<TypeDefinition>) -> TypeRegistry {
        TypeRegistry::with_rest_adapters(definitions).unwrap()
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = registry(vec![TypeDefinition::new("query", "id", "key", "name")]);
        let again = Arc::new(RestTypeAdapter::new(TypeDefinition::new("query", "id", "key", "name")));

        assert!(matches!(registry.register(again), Err(SyncError::Definition(_))));
        assert_eq!(registry.list_types(), vec!["query"]);
    }

    #[test]
    fn test_unknown_type() {
        let registry = TypeRegistry::new();
        assert!(matches!(registry.adapter("nope"), Err(SyncError::UnknownType(_))));
    }

    #[test]
    fn test_deploy_order_follows_dependencies() {
        let registry = registry(vec![
            TypeDefinition::new("automation", "id", "key", "name")
                .depends_on("query", &["steps[].activities[].key"])
                .depends_on("dataExtension", &["deKey"]),
            TypeDefinition::new("query", "id", "key", "name").depends_on("dataExtension", &["targetKey"]),
            TypeDefinition::new("dataExtension", "id", "key", "name"),
        ]);

        let order = registry
            .deploy_order(["automation", "query", "dataExtension"])
            .unwrap();
        assert_eq!(order, vec!["dataExtension", "query", "automation"]);
    }

    #[test]
    fn test_deploy_order_breaks_cycles() {
        let registry = registry(vec![
            TypeDefinition::new("a", "id", "key", "name").depends_on("b", &["b"]),
            TypeDefinition::new("b", "id", "key", "name").depends_on("a", &["a"]),
            TypeDefinition::new("c", "id", "key", "name"),
        ]);

        let order = registry.deploy_order(["a", "b", "c"]).unwrap();
        assert_eq!(order, vec!["c", "a", "b"]);
    }
}
