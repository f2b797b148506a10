use crate::adapter::RemoteQuery;
use crate::config::{EngineConfig, RunOptions};
use crate::context::RunContext;
use crate::core::{EntityMap, KeysByType, Result, SyncError, key_of};
use crate::definition::{TypeDefinition, TypeRegistry};
use crate::filter::FilterRules;
use crate::pipeline::{
    self, DeleteOutcome, DependencyClosure, RetrieveOutcome, RunReport, TypeReport,
};
use crate::remote::{HttpRemote, RemoteClient};
use crate::storage::{EntityStore, FileStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// High-level entry point running whole commands against one tenant.
///
/// ```no_run
/// # use mdsync::{EngineConfig, SyncEngine, TypeDefinition};
/// # async fn run() -> mdsync::Result<()> {
/// let config = EngineConfig::new("dev").base_url("https://api.example.com");
/// let types = vec![TypeDefinition::new("query", "queryId", "key", "name").endpoint("/queries")];
///
/// let mut engine = SyncEngine::connect(config, types)?;
/// let outcome = engine.retrieve("query", None).await?;
/// println!("{outcome}");
/// # Ok(())
/// # }
/// ```
pub struct SyncEngine {
    ctx: RunContext,
}

impl SyncEngine {
    /// Engine over HTTP and the file store below `config.root_dir`.
    pub fn connect(config: EngineConfig, definitions: Vec<TypeDefinition>) -> Result<Self> {
        config.validate()?;
        let registry = TypeRegistry::with_rest_adapters(definitions)?;
        let remote = HttpRemote::new(&config)?;
        let store = FileStore::new(&config.root_dir, &config.tenant, &config.business_unit);
        Ok(Self::new(config, Arc::new(registry), Arc::new(remote), Arc::new(store)))
    }

    pub fn new(
        config: EngineConfig,
        registry: Arc<TypeRegistry>,
        remote: Arc<dyn RemoteClient>,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            ctx: RunContext::new(config, registry, remote, store),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Result<Self> {
        options.validate()?;
        self.ctx.options = options;
        Ok(self)
    }

    pub fn with_filters(mut self, filters: FilterRules) -> Self {
        self.ctx.filters = filters;
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.ctx
    }

    /// Retrieves a type after caching the types its references point into.
    pub async fn retrieve(&mut self, type_name: &str, keys: Option<&[String]>) -> Result<RetrieveOutcome> {
        let dependencies = self.ctx.registry.definition(type_name)?.dependencies.clone();
        pipeline::populate_cache(&mut self.ctx, &dependencies).await?;

        let query = RemoteQuery::all(self.ctx.config.page_size);
        pipeline::retrieve(&self.ctx, type_name, &query, keys).await
    }

    /// Dependency closure of persisted entities.
    pub async fn deps(&self, seed: &KeysByType) -> Result<DependencyClosure> {
        pipeline::expand(&self.ctx, seed).await
    }

    /// Deploys persisted entities of `type_name` together with everything
    /// they depend on, dependencies first.
    ///
    /// Without `keys`, every persisted entity passing the filters and `like`
    /// patterns is deployed. Key options (rename, suffix) only apply to
    /// `type_name`; dependencies are deployed under their own keys.
    pub async fn deploy(&mut self, type_name: &str, keys: Option<&[String]>) -> Result<RunReport> {
        let mut report = RunReport::start(self.ctx.tenant());
        let definition = self.ctx.registry.definition(type_name)?;
        let key_field = definition.key_field.clone();

        let mut misfiled = Vec::new();
        let seed_keys: BTreeSet<String> = match keys {
            Some(keys) => {
                let mut selected = BTreeSet::new();
                for key in keys {
                    // missing and unreadable records surface in the closure
                    let filed_key = match self.ctx.store.read_entity(type_name, key).await {
                        Ok(Some(entity)) => key_of(&entity, &key_field),
                        _ => Some(key.clone()),
                    };
                    if filed_key.as_deref() == Some(key.as_str()) {
                        selected.insert(key.clone());
                        continue;
                    }
                    warn!(type_name, key = %key, entity_key = ?filed_key, "file name does not match {key_field}");
                    let err = SyncError::Validation(format!(
                        "record filed under '{key}' has {key_field} {}",
                        filed_key.as_deref().unwrap_or("<missing>")
                    ));
                    misfiled.push((key.clone(), err));
                }
                selected
            }
            None => {
                let filters = self.ctx.filters.clone().with_like(&self.ctx.options.like);
                let loaded = self.ctx.store.load_all(type_name, &key_field).await?;
                let mut selected = BTreeSet::new();
                for (key, entity) in loaded.items {
                    if filters.keep(&entity)? {
                        selected.insert(key);
                    }
                }
                selected
            }
        };
        if seed_keys.is_empty() {
            if let Some((_, err)) = misfiled.into_iter().next() {
                return Err(err);
            }
            warn!(type_name, "nothing to deploy");
            report.finish();
            return Ok(report);
        }

        let mut seed = KeysByType::new();
        seed.insert(type_name.to_string(), seed_keys);
        let closure = pipeline::expand(&self.ctx, &seed).await?;
        for (missing_type, missing) in &closure.not_found {
            warn!(type_name = %missing_type, keys = ?missing, "dependencies not found locally");
        }
        if closure.found.get(type_name).is_none_or(BTreeSet::is_empty) {
            return Err(SyncError::Validation(format!(
                "no persisted {type_name} matches the requested keys"
            )));
        }

        let mut types = Vec::new();
        for found_type in closure.found.keys() {
            if self.ctx.registry.contains(found_type) {
                types.push(found_type.clone());
            } else {
                warn!(type_name = %found_type, "no adapter, not deployed");
            }
        }
        let order = self.ctx.registry.deploy_order(types.iter().map(String::as_str))?;
        pipeline::populate_cache(&mut self.ctx, &order).await?;

        let run_options = self.ctx.options.clone();
        let dependency_options = RunOptions::new().no_update(run_options.no_update);

        for deploy_type in &order {
            let mut items = EntityMap::new();
            for key in &closure.found[deploy_type] {
                if let Some(entity) = self.ctx.store.read_entity(deploy_type, key).await? {
                    items.insert(key.clone(), entity);
                }
            }

            self.ctx.options = if deploy_type == type_name {
                run_options.clone()
            } else {
                dependency_options.clone()
            };
            let outcome = pipeline::upsert(&mut self.ctx, deploy_type, items).await;
            self.ctx.options = run_options.clone();

            let mut outcome = outcome?;
            if deploy_type == type_name {
                for (key, err) in misfiled.drain(..) {
                    outcome.fail(&key, &err);
                }
            }
            info!("{outcome}");
            report.push(TypeReport::Upsert(outcome));
        }

        report.finish();
        Ok(report)
    }

    /// Deletes entities remotely and locally.
    pub async fn delete(&mut self, type_name: &str, keys: &[String]) -> Result<DeleteOutcome> {
        pipeline::populate_cache(&mut self.ctx, &[type_name.to_string()]).await?;
        pipeline::delete(&mut self.ctx, type_name, keys).await
    }
}
