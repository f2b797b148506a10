use crate::core::{Result, SyncError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Engine and connection configuration for one project
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// REST base URL of the tenant
    pub base_url: String,

    /// Bearer token used for every request
    pub auth_token: String,

    /// Tenant (account) identifier; scopes the reference cache
    pub tenant: String,

    /// Business unit within the tenant; part of the persisted path
    pub business_unit: String,

    /// Root of the local file tree
    pub root_dir: PathBuf,

    /// Concurrent create calls in flight
    pub create_concurrency: usize,

    /// Concurrent update calls in flight
    pub update_concurrency: usize,

    /// Concurrent detail fetches in flight during retrieval
    pub retrieve_concurrency: usize,

    /// Page size for paginated list endpoints
    pub page_size: usize,

    /// Timeout of a single remote call
    pub request_timeout: Duration,
}

impl EngineConfig {
    /// Create a configuration with defaults for the given tenant
    pub fn new(tenant: &str) -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            auth_token: String::new(),
            tenant: tenant.to_string(),
            business_unit: "default".to_string(),
            root_dir: PathBuf::from("retrieve"),
            create_concurrency: DEFAULT_CONCURRENCY,
            update_concurrency: DEFAULT_CONCURRENCY,
            retrieve_concurrency: DEFAULT_CONCURRENCY,
            page_size: 500,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the REST base URL
    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    /// Set the bearer token
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = token.to_string();
        self
    }

    /// Set the business unit
    pub fn business_unit(mut self, business_unit: &str) -> Self {
        self.business_unit = business_unit.to_string();
        self
    }

    /// Set the local root directory
    pub fn root_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = root.into();
        self
    }

    /// Set create and update concurrency at once
    pub fn concurrency(mut self, width: usize) -> Self {
        self.create_concurrency = width;
        self.update_concurrency = width;
        self
    }

    /// Set create concurrency
    pub fn create_concurrency(mut self, width: usize) -> Self {
        self.create_concurrency = width;
        self
    }

    /// Set update concurrency
    pub fn update_concurrency(mut self, width: usize) -> Self {
        self.update_concurrency = width;
        self
    }

    /// Set retrieve concurrency
    pub fn retrieve_concurrency(mut self, width: usize) -> Self {
        self.retrieve_concurrency = width;
        self
    }

    /// Set page size
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load from a JSON project file
    ///
    /// ```ignore
    /// {
    ///   "baseUrl": "https://tenant.rest.example.com",
    ///   "tenant": "acme",
    ///   "businessUnit": "marketing",
    ///   "authTokenEnv": "MDSYNC_TOKEN"
    /// }
    /// ```
    ///
    /// The token is read from the environment variable named by
    /// `authTokenEnv`, never from the file itself.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let file: ProjectFile = serde_json::from_str(&raw)
            .map_err(|e| SyncError::Config(format!("invalid {}: {}", path.display(), e)))?;

        let mut config = Self::new(&file.tenant).base_url(&file.base_url);
        if let Some(business_unit) = file.business_unit {
            config = config.business_unit(&business_unit);
        }
        if let Some(root) = file.root_dir {
            config = config.root_dir(root);
        }
        if let Some(width) = file.concurrency {
            config = config.concurrency(width).retrieve_concurrency(width);
        }
        if let Some(size) = file.page_size {
            config = config.page_size(size);
        }
        if let Some(secs) = file.request_timeout_secs {
            config = config.request_timeout(Duration::from_secs(secs));
        }
        if let Some(var) = file.auth_token_env {
            let token = std::env::var(&var)
                .map_err(|_| SyncError::Config(format!("environment variable {var} is not set")))?;
            config = config.auth_token(&token);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.tenant.trim().is_empty() {
            return Err(SyncError::Config("tenant cannot be empty".into()));
        }

        if self.business_unit.trim().is_empty() {
            return Err(SyncError::Config("business unit cannot be empty".into()));
        }

        if self.create_concurrency == 0 || self.update_concurrency == 0 || self.retrieve_concurrency == 0 {
            return Err(SyncError::Config("concurrency must be > 0".into()));
        }

        if self.page_size == 0 {
            return Err(SyncError::Config("page_size must be > 0".into()));
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "base_url '{}' must start with http:// or https://",
                self.base_url
            )));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFile {
    base_url: String,
    tenant: String,
    business_unit: Option<String>,
    root_dir: Option<PathBuf>,
    concurrency: Option<usize>,
    page_size: Option<usize>,
    request_timeout_secs: Option<u64>,
    auth_token_env: Option<String>,
}

/// Per-run flags supplied by the orchestrator; the engine only reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Skip updates of entities that already exist remotely
    pub no_update: bool,

    /// Rename keys to the value of this field
    pub change_key_field: Option<String>,

    /// Rename the key of the single deployed entity to this value
    pub change_key_value: Option<String>,

    /// Deploy every key with this suffix appended
    pub key_suffix: Option<String>,

    /// LIKE patterns per field that retrieved entities must match
    pub like: BTreeMap<String, String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_update(mut self, enabled: bool) -> Self {
        self.no_update = enabled;
        self
    }

    pub fn change_key_field(mut self, field: &str) -> Self {
        self.change_key_field = Some(field.to_string());
        self
    }

    pub fn change_key_value(mut self, value: &str) -> Self {
        self.change_key_value = Some(value.to_string());
        self
    }

    pub fn key_suffix(mut self, suffix: &str) -> Self {
        self.key_suffix = Some(suffix.to_string());
        self
    }

    pub fn like(mut self, field: &str, pattern: &str) -> Self {
        self.like.insert(field.to_string(), pattern.to_string());
        self
    }

    pub fn renames_keys(&self) -> bool {
        self.change_key_field.is_some() || self.change_key_value.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.change_key_field.is_some() && self.change_key_value.is_some() {
            return Err(SyncError::Config(
                "change_key_field and change_key_value cannot be combined".into(),
            ));
        }

        if matches!(&self.change_key_value, Some(v) if v.trim().is_empty()) {
            return Err(SyncError::Config("change_key_value cannot be empty".into()));
        }

        if matches!(&self.key_suffix, Some(s) if s.trim().is_empty()) {
            return Err(SyncError::Config("key_suffix cannot be empty".into()));
        }

        if self.key_suffix.is_some() && self.renames_keys() {
            return Err(SyncError::Config(
                "key_suffix cannot be combined with a key change".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.create_concurrency, 10);
        assert_eq!(config.update_concurrency, 10);
        assert_eq!(config.page_size, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::new("acme")
            .base_url("https://api.example.com")
            .business_unit("marketing")
            .concurrency(4)
            .page_size(50);

        assert_eq!(config.tenant, "acme");
        assert_eq!(config.business_unit, "marketing");
        assert_eq!(config.create_concurrency, 4);
        assert_eq!(config.update_concurrency, 4);
        assert_eq!(config.retrieve_concurrency, 10);
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn test_validate() {
        assert!(EngineConfig::new("").validate().is_err());
        assert!(EngineConfig::new("t").concurrency(0).validate().is_err());
        assert!(EngineConfig::new("t").page_size(0).validate().is_err());
        assert!(EngineConfig::new("t").base_url("ftp://x").validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        std::fs::write(
            &path,
            r#"{"baseUrl": "https://api.example.com", "tenant": "acme", "concurrency": 3}"#,
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.tenant, "acme");
        assert_eq!(config.update_concurrency, 3);
        assert_eq!(config.retrieve_concurrency, 3);
        assert_eq!(config.business_unit, "default");
    }

    #[test]
    fn test_run_options_validate() {
        assert!(RunOptions::new().validate().is_ok());
        assert!(
            RunOptions::new()
                .change_key_field("name")
                .change_key_value("x")
                .validate()
                .is_err()
        );
        assert!(RunOptions::new().key_suffix(" ").validate().is_err());
        assert!(
            RunOptions::new()
                .key_suffix("_DEV")
                .change_key_field("name")
                .validate()
                .is_err()
        );
        assert!(RunOptions::new().key_suffix("_DEV").validate().is_ok());
    }
}
