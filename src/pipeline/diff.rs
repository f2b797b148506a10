use crate::core::{Entity, FieldPath};
use crate::definition::TypeDefinition;
use tracing::trace;

/// Whether `candidate` would change `cached` when written.
///
/// Only attributes present on the candidate are compared; attributes the
/// cached entity has beyond them never count. Paths listed in
/// `ignoreFieldsForUpdateCheck` are left out on both sides.
pub fn has_changed(definition: &TypeDefinition, cached: &Entity, candidate: &Entity) -> bool {
    let (cached, candidate) = if definition.ignore_fields_for_update_check.is_empty() {
        (cached.clone(), candidate.clone())
    } else {
        let mut cached = cached.clone();
        let mut candidate = candidate.clone();
        for raw in &definition.ignore_fields_for_update_check {
            if let Ok(path) = FieldPath::parse(raw) {
                path.remove(&mut cached);
                path.remove(&mut candidate);
            }
        }
        (cached, candidate)
    };

    let changed = candidate
        .iter()
        .find(|&(field, value)| cached.get(field) != Some(value));

    if let Some((field, _)) = changed {
        trace!(type_name = %definition.type_name, field = %field, "field differs");
        return true;
    }
    false
}
