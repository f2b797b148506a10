use crate::context::RunContext;
use crate::core::{FieldPath, KeysByType, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{Instrument, debug, info, info_span, warn};

/// Transitive dependency closure of a seed set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyClosure {
    /// Keys whose persisted entity was read, seeds included.
    pub found: KeysByType,
    /// Keys referenced somewhere but not persisted locally.
    pub not_found: KeysByType,
}

impl DependencyClosure {
    pub fn contains(&self, type_name: &str, key: &str) -> bool {
        [&self.found, &self.not_found]
            .iter()
            .any(|set| set.get(type_name).is_some_and(|keys| keys.contains(key)))
    }

    pub fn found_count(&self) -> usize {
        self.found.values().map(BTreeSet::len).sum()
    }

    pub fn not_found_count(&self) -> usize {
        self.not_found.values().map(BTreeSet::len).sum()
    }
}

fn insert(set: &mut KeysByType, type_name: &str, key: &str) {
    set.entry(type_name.to_string())
        .or_default()
        .insert(key.to_string());
}

/// Expands `seed` breadth-first over the persisted entities, following the
/// dependency-graph paths of each type until no new (type, key) appears.
///
/// Every pair is read at most once, so reference cycles terminate. Types
/// without a definition are read but contribute no edges.
pub async fn expand(ctx: &RunContext, seed: &KeysByType) -> Result<DependencyClosure> {
    let span = info_span!("expand", seeds = seed.values().map(BTreeSet::len).sum::<usize>());

    async {
        let mut closure = DependencyClosure::default();
        let mut frontier = seed.clone();
        let mut depth = 0usize;

        while !frontier.is_empty() {
            depth += 1;
            let mut discovered = KeysByType::new();

            for (type_name, keys) in &frontier {
                let edges: Vec<(String, Vec<FieldPath>)> = match ctx.registry.definition(type_name) {
                    Ok(definition) => definition
                        .dependency_paths()?
                        .into_iter()
                        .map(|(dep_type, paths)| (dep_type.to_string(), paths))
                        .collect(),
                    Err(_) => {
                        warn!(type_name = %type_name, "unknown type, dependencies not followed");
                        Vec::new()
                    }
                };

                for key in keys {
                    let entity = match ctx.store.read_entity(type_name, key).await {
                        Ok(Some(entity)) => entity,
                        Ok(None) => {
                            debug!(type_name = %type_name, key = %key, "not persisted");
                            insert(&mut closure.not_found, type_name, key);
                            continue;
                        }
                        Err(err) => {
                            warn!(type_name = %type_name, key = %key, error = %err, "unreadable");
                            insert(&mut closure.not_found, type_name, key);
                            continue;
                        }
                    };
                    insert(&mut closure.found, type_name, key);

                    for (dep_type, paths) in &edges {
                        for path in paths {
                            for dep_key in path.keys(&entity) {
                                insert(&mut discovered, dep_type, &dep_key);
                            }
                        }
                    }
                }
            }

            frontier = discovered
                .into_iter()
                .filter_map(|(type_name, keys)| {
                    let fresh: BTreeSet<String> = keys
                        .into_iter()
                        .filter(|key| !closure.contains(&type_name, key))
                        .collect();
                    (!fresh.is_empty()).then_some((type_name, fresh))
                })
                .collect();
            debug!(depth, next = frontier.len(), "frontier expanded");
        }

        info!(
            found = closure.found_count(),
            not_found = closure.not_found_count(),
            depth,
            "dependencies resolved"
        );
        Ok(closure)
    }
    .instrument(span)
    .await
}
