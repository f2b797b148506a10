use super::pool::WorkerPool;
use super::summary::{EntityFailure, RetrieveOutcome};
use crate::adapter::{RemoteQuery, TypeAdapter};
use crate::context::RunContext;
use crate::core::{Entity, Result, key_of};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};

/// Raw entities keyed by key field, in API order. Keyless items are counted
/// and dropped.
fn keyed(adapter: &dyn TypeAdapter, entities: Vec<Entity>, keyless: &mut usize) -> Vec<(String, Entity)> {
    let key_field = &adapter.definition().key_field;
    let mut seen = BTreeSet::new();
    let mut keyed = Vec::with_capacity(entities.len());
    for entity in entities {
        let Some(key) = key_of(&entity, key_field) else {
            warn!(type_name = %adapter.type_name(), "item without {key_field} skipped");
            *keyless += 1;
            continue;
        };
        if !seen.insert(key.clone()) {
            debug!(type_name = %adapter.type_name(), key = %key, "duplicate item in response");
            continue;
        }
        keyed.push((key, entity));
    }
    keyed
}

async fn fetch_raw(
    ctx: &RunContext,
    adapter: &dyn TypeAdapter,
    query: &RemoteQuery,
    key_filter: Option<&[String]>,
) -> Result<Vec<Entity>> {
    let remote = Arc::clone(&ctx.remote);
    let remote = remote.as_ref();

    match key_filter {
        Some(keys) if adapter.definition().filter_by_key => {
            let pool = WorkerPool::new(ctx.config.retrieve_concurrency);
            let pages = pool
                .run(keys.iter().map(|key| {
                    let query = query.for_key(key);
                    async move { adapter.fetch(remote, &query).await }
                }))
                .await;
            let mut entities = Vec::new();
            for page in pages {
                entities.extend(page?);
            }
            Ok(entities)
        }
        _ => adapter.fetch(remote, query).await,
    }
}

/// Fetches a type, converts it to portable form, filters and persists it.
///
/// Transport errors abort the retrieve. An entity whose references cannot
/// be resolved is skipped and reported.
pub async fn retrieve(
    ctx: &RunContext,
    type_name: &str,
    query: &RemoteQuery,
    key_filter: Option<&[String]>,
) -> Result<RetrieveOutcome> {
    let adapter = ctx.registry.adapter(type_name)?;
    let span = info_span!("retrieve", type_name);

    async {
        let adapter = adapter.as_ref();
        let definition = adapter.definition();
        let filters = ctx.filters.clone().with_like(&ctx.options.like);
        let mut outcome = RetrieveOutcome {
            type_name: type_name.to_string(),
            ..RetrieveOutcome::default()
        };

        let raw = fetch_raw(ctx, adapter, query, key_filter).await?;
        let mut entries = keyed(adapter, raw, &mut outcome.keyless);
        if let Some(keys) = key_filter {
            let wanted: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
            entries.retain(|(key, _)| wanted.contains(key.as_str()));
        }

        for (key, entity) in entries {
            let mut portable = match adapter.post_retrieve(&ctx.cache, entity) {
                Ok(portable) => portable,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(key = %key, error = %err, "skipped");
                    outcome.failed.push(EntityFailure::new(&key, &err));
                    continue;
                }
            };
            definition.prune_for_retrieve(&mut portable);

            if !filters.keep(&portable)? {
                debug!(key = %key, "filtered out");
                outcome.filtered += 1;
                continue;
            }

            if let Err(err) = ctx.store.write_entity(type_name, &key, &portable).await {
                warn!(key = %key, error = %err, "not persisted");
                outcome.failed.push(EntityFailure::new(&key, &err));
                continue;
            }
            outcome.items.insert(key, portable);
        }

        info!(
            retrieved = outcome.items.len(),
            filtered = outcome.filtered,
            failed = outcome.failed.len(),
            "retrieve finished"
        );
        Ok(outcome)
    }
    .instrument(span)
    .await
}

/// Fills the reference cache for a type with its raw remote form.
pub async fn retrieve_for_cache(ctx: &mut RunContext, type_name: &str) -> Result<usize> {
    let adapter = ctx.registry.adapter(type_name)?;
    let query = RemoteQuery::all(ctx.config.page_size);
    let raw = adapter.fetch(ctx.remote.as_ref(), &query).await?;

    let mut keyless = 0;
    let entries = keyed(adapter.as_ref(), raw, &mut keyless);
    let count = entries.len();
    ctx.cache.set_entities(type_name, entries);
    info!(type_name, count, "cached");
    Ok(count)
}

/// Caches `types` and every registered type they depend on, dependencies
/// first. Types already cached for the tenant are not fetched again.
pub async fn populate_cache(ctx: &mut RunContext, types: &[String]) -> Result<()> {
    let mut wanted: BTreeSet<String> = BTreeSet::new();
    let mut queue: Vec<String> = types.to_vec();
    while let Some(type_name) = queue.pop() {
        if !ctx.registry.contains(&type_name) || !wanted.insert(type_name.clone()) {
            continue;
        }
        queue.extend(ctx.registry.definition(&type_name)?.dependencies.iter().cloned());
    }

    for type_name in ctx.registry.deploy_order(wanted.iter().map(String::as_str))? {
        let cacheable = ctx.registry.definition(&type_name)?.cacheable;
        if !cacheable || ctx.cache.is_populated(&type_name) {
            continue;
        }
        retrieve_for_cache(ctx, &type_name).await?;
    }
    Ok(())
}
