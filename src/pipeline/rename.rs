use std::collections::HashMap;

/// Pending key renames per type, `new_key -> old_key`.
///
/// A record only turns into cache repointing and artifact cleanup once the
/// remote update it belongs to has succeeded; failed updates discard it.
#[derive(Debug, Default)]
pub struct KeyRenameTracker {
    renames: HashMap<String, HashMap<String, String>>,
}

impl KeyRenameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, type_name: &str, old_key: &str, new_key: &str) {
        self.renames
            .entry(type_name.to_string())
            .or_default()
            .insert(new_key.to_string(), old_key.to_string());
    }

    /// Takes the old key recorded for `new_key`.
    pub fn consume(&mut self, type_name: &str, new_key: &str) -> Option<String> {
        let renames = self.renames.get_mut(type_name)?;
        let old_key = renames.remove(new_key);
        if renames.is_empty() {
            self.renames.remove(type_name);
        }
        old_key
    }

    /// Drops a record without acting on it.
    pub fn discard(&mut self, type_name: &str, new_key: &str) {
        let _ = self.consume(type_name, new_key);
    }

    pub fn pending(&self, type_name: &str) -> usize {
        self.renames.get(type_name).map_or(0, HashMap::len)
    }

    pub fn clear_type(&mut self, type_name: &str) {
        self.renames.remove(type_name);
    }

    pub fn clear(&mut self) {
        self.renames.clear();
    }
}
