use crate::cache::ReferenceCache;
use crate::config::{EngineConfig, RunOptions};
use crate::definition::TypeRegistry;
use crate::filter::FilterRules;
use crate::pipeline::KeyRenameTracker;
use crate::remote::RemoteClient;
use crate::storage::EntityStore;
use std::sync::Arc;

/// State of one synchronization run, passed by reference through every
/// pipeline stage. The cache and rename records live exactly as long as the run.
pub struct RunContext {
    pub config: EngineConfig,
    pub options: RunOptions,
    pub filters: FilterRules,
    pub registry: Arc<TypeRegistry>,
    pub remote: Arc<dyn RemoteClient>,
    pub store: Arc<dyn EntityStore>,
    pub cache: ReferenceCache,
    pub renames: KeyRenameTracker,
}

impl RunContext {
    pub fn new(
        config: EngineConfig,
        registry: Arc<TypeRegistry>,
        remote: Arc<dyn RemoteClient>,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        let cache = ReferenceCache::new(&config.tenant);
        Self {
            config,
            options: RunOptions::default(),
            filters: FilterRules::default(),
            registry,
            remote,
            store,
            cache,
            renames: KeyRenameTracker::new(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_filters(mut self, filters: FilterRules) -> Self {
        self.filters = filters;
        self
    }

    pub fn tenant(&self) -> &str {
        self.cache.tenant()
    }
}
