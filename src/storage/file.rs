use super::EntityStore;
use crate::core::{Entity, Result, SyncError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const EXTENSION: &str = "json";

/// File-tree store: `root/<tenant>/<business_unit>/<type>/<key>.json`.
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>, tenant: &str, business_unit: &str) -> Self {
        Self {
            base: root.as_ref().join(tenant).join(business_unit),
        }
    }

    pub fn type_dir(&self, type_name: &str) -> PathBuf {
        self.base.join(type_name)
    }

    pub fn entity_path(&self, type_name: &str, key: &str) -> PathBuf {
        self.type_dir(type_name)
            .join(format!("{}.{EXTENSION}", escape_key(key)))
    }

    /// Writes through a temporary file and renames it into place.
    async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for FileStore {
    async fn read_entity(&self, type_name: &str, key: &str) -> Result<Option<Entity>> {
        let path = self.entity_path(type_name, key);
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entity = serde_json::from_str(&raw).map_err(|err| {
            SyncError::Persistence(format!("{}: {}", path.display(), err))
        })?;
        Ok(Some(entity))
    }

    async fn write_entity(&self, type_name: &str, key: &str, entity: &Entity) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(entity)?;
        bytes.push(b'\n');
        Self::write_atomic(&self.entity_path(type_name, key), bytes).await
    }

    async fn delete_entity(&self, type_name: &str, key: &str) -> Result<bool> {
        match fs::remove_file(self.entity_path(type_name, key)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_keys(&self, type_name: &str) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(self.type_dir(type_name)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(unescape_key(stem));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn is_illegal(c: char) -> bool {
    matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '%') || c.is_control()
}

/// Percent-escapes characters that cannot appear in file names.
pub fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if is_illegal(c) {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                escaped.push_str(&format!("%{byte:02X}"));
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}

pub fn unescape_key(stem: &str) -> String {
    let bytes = stem.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = [bytes[i + 1], bytes[i + 2]];
            let byte = std::str::from_utf8(&hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = byte {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
