//! Create-or-update of local entities against the remote API.
//!
//! Every entity is classified against the reference cache first. Creates are
//! dispatched and fully awaited before any update starts, so that an update
//! never observes a half-created dependency.

use super::pool::WorkerPool;
use super::summary::{DeleteOutcome, EntityFailure, UpsertOutcome};
use crate::adapter::{TypeAdapter, UpdateRequest};
use crate::config::RunOptions;
use crate::context::RunContext;
use crate::core::{Entity, EntityMap, Result, SyncError, key_of};
use crate::definition::TypeDefinition;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

struct PlannedCreate {
    key: String,
    payload: Entity,
    /// Deployable form before create pruning; cached once the API confirms.
    deployable: Entity,
}

struct PlannedUpdate {
    /// Key the entity is persisted under locally.
    local_key: String,
    /// Key the entity currently has remotely.
    key: String,
    new_key: Option<String>,
    before: Entity,
    after: Entity,
    /// Local form to persist under the new key once the rename succeeds.
    renamed_local: Option<Entity>,
}

enum Planned {
    Create(PlannedCreate),
    Update(PlannedUpdate),
    Unchanged,
    Skipped,
}

#[derive(Default)]
struct Plan {
    creates: Vec<PlannedCreate>,
    updates: Vec<PlannedUpdate>,
}

/// Deploys `items` (portable form, keyed by local key) of one type.
///
/// Per-entity failures are collected in the outcome; only fatal transport
/// errors abort, after every in-flight call has settled.
pub async fn upsert(ctx: &mut RunContext, type_name: &str, items: EntityMap) -> Result<UpsertOutcome> {
    let adapter = ctx.registry.adapter(type_name)?;
    let span = info_span!("upsert", type_name, count = items.len());

    async {
        let mut outcome = UpsertOutcome::new(type_name, items.len());
        let plan = plan(ctx, adapter.as_ref(), items, &mut outcome)?;
        info!(
            creates = plan.creates.len(),
            updates = plan.updates.len(),
            unchanged = outcome.unchanged,
            "dispatching"
        );

        let dispatched = match dispatch_creates(ctx, adapter.as_ref(), plan.creates, &mut outcome).await {
            Ok(()) => dispatch_updates(ctx, adapter.as_ref(), plan.updates, &mut outcome).await,
            Err(err) => Err(err),
        };
        ctx.renames.clear_type(type_name);
        dispatched?;

        info!(
            created = outcome.created,
            updated = outcome.updated,
            failed = outcome.failed.len(),
            "upsert finished"
        );
        Ok(outcome)
    }
    .instrument(span)
    .await
}

fn plan(
    ctx: &mut RunContext,
    adapter: &dyn TypeAdapter,
    items: EntityMap,
    outcome: &mut UpsertOutcome,
) -> Result<Plan> {
    let type_name = adapter.type_name().to_string();
    let batch = items.len();
    let mut plan = Plan::default();
    let mut claimed: HashSet<String> = HashSet::new();

    for (local_key, local) in items {
        let planned = match plan_entity(ctx, adapter, &local_key, local, batch) {
            Ok(planned) => planned,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!(key = %local_key, error = %err, "not deployed");
                outcome.fail(&local_key, &err);
                continue;
            }
        };

        match planned {
            Planned::Create(create) if !claimed.insert(create.key.clone()) => {
                let err = duplicate_target(&type_name, &create.key);
                outcome.fail(&local_key, &err);
            }
            Planned::Update(update)
                if !claimed.insert(update.key.clone())
                    || update.new_key.as_ref().is_some_and(|k| !claimed.insert(k.clone())) =>
            {
                let err = duplicate_target(&type_name, update.new_key.as_ref().unwrap_or(&update.key));
                outcome.fail(&local_key, &err);
            }
            Planned::Create(create) => plan.creates.push(create),
            Planned::Update(update) => {
                if let Some(new_key) = &update.new_key {
                    ctx.renames.record(&type_name, &update.key, new_key);
                }
                plan.updates.push(update);
            }
            Planned::Unchanged => {
                debug!(key = %local_key, "unchanged");
                outcome.unchanged += 1;
            }
            Planned::Skipped => {
                debug!(key = %local_key, "exists, updates disabled");
                outcome.skipped += 1;
            }
        }
    }
    Ok(plan)
}

fn duplicate_target(type_name: &str, key: &str) -> SyncError {
    SyncError::Validation(format!(
        "more than one {type_name} in this deployment targets key '{key}'"
    ))
}

fn plan_entity(
    ctx: &RunContext,
    adapter: &dyn TypeAdapter,
    local_key: &str,
    local: Entity,
    batch: usize,
) -> Result<Planned> {
    let definition = adapter.definition();
    let type_name = definition.type_name.as_str();
    let key_field = definition.key_field.as_str();
    let id_keyed = definition.id_field == definition.key_field;
    let mut candidate = adapter.pre_deploy(&ctx.cache, local.clone())?;

    let mut key = match key_of(&candidate, key_field) {
        Some(key) => key,
        None if id_keyed => {
            // id-keyed entities get their key from the server
            let deployable = candidate.clone();
            definition.prune_for_create(&mut candidate);
            return Ok(Planned::Create(PlannedCreate {
                key: local_key.to_string(),
                payload: candidate,
                deployable,
            }));
        }
        None => {
            return Err(SyncError::Validation(format!("{key_field} is missing")));
        }
    };

    if !id_keyed && key.chars().count() > definition.max_key_length {
        return Err(SyncError::Validation(format!(
            "key '{key}' exceeds {} characters",
            definition.max_key_length
        )));
    }

    if let Some(suffix) = &ctx.options.key_suffix {
        if definition.allows_rename() {
            key = with_suffix(&key, suffix, definition.max_key_length)?;
            candidate.insert(key_field.to_string(), Value::String(key.clone()));
        } else {
            debug!(key = %key, "key suffix ignored for fixed keys");
        }
    }

    let existing = if definition.cacheable {
        match ctx.cache.get_by_key(type_name, &key) {
            Some(cached) => Some(cached.clone()),
            None => adapter
                .cache_matched_by_name(&ctx.cache, &candidate)
                .map(|(cached_key, cached)| {
                    info!(key = %key, cached_key = %cached_key, "matched by name, adopting cached key");
                    key = cached_key;
                    candidate.insert(key_field.to_string(), Value::String(key.clone()));
                    cached
                }),
        }
    } else if key_of(&candidate, &definition.id_field).is_some() {
        Some(candidate.clone())
    } else {
        None
    };

    let Some(before) = existing else {
        let deployable = candidate.clone();
        definition.prune_for_create(&mut candidate);
        return Ok(Planned::Create(PlannedCreate {
            key,
            payload: candidate,
            deployable,
        }));
    };

    if ctx.options.no_update {
        return Ok(Planned::Skipped);
    }

    let new_key = requested_key(definition, &ctx.options, &candidate, batch)?.filter(|k| *k != key);
    if let Some(new_key) = &new_key {
        if ctx.cache.get_by_key(type_name, new_key).is_some() {
            return Err(SyncError::Validation(format!(
                "cannot rename '{key}': key '{new_key}' is already in use"
            )));
        }
        candidate.insert(key_field.to_string(), Value::String(new_key.clone()));
    }

    let mut after = candidate;
    definition.prune_for_update(&mut after);
    if definition.cacheable && new_key.is_none() && !adapter.has_changed(&before, &after) {
        return Ok(Planned::Unchanged);
    }

    let renamed_local = new_key.as_ref().map(|new_key| {
        let mut renamed = local;
        renamed.insert(key_field.to_string(), Value::String(new_key.clone()));
        renamed
    });

    Ok(Planned::Update(PlannedUpdate {
        local_key: local_key.to_string(),
        key,
        new_key,
        before,
        after,
        renamed_local,
    }))
}

/// Key an existing entity is asked to move to, if any.
fn requested_key(
    definition: &TypeDefinition,
    options: &RunOptions,
    candidate: &Entity,
    batch: usize,
) -> Result<Option<String>> {
    let max = definition.max_key_length;
    let requested = if let Some(value) = &options.change_key_value {
        if batch > 1 {
            return Err(SyncError::Validation(
                "change_key_value needs exactly one entity per deployment".into(),
            ));
        }
        let value = value.trim().to_string();
        if value.chars().count() > max {
            return Err(SyncError::Validation(format!(
                "new key '{value}' exceeds {max} characters"
            )));
        }
        value
    } else if let Some(field) = &options.change_key_field {
        let value = key_of(candidate, field).ok_or_else(|| {
            SyncError::Validation(format!("{field} is empty, cannot derive a new key"))
        })?;
        if value.chars().count() > max {
            warn!(field = %field, value = %value, max, "new key truncated");
        }
        truncate_chars(&value, max)
    } else {
        return Ok(None);
    };

    if !definition.allows_rename() {
        return Err(SyncError::Validation(format!(
            "{} keys cannot be changed",
            definition.type_name
        )));
    }
    Ok(Some(requested))
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// `key` with `suffix` appended, shortening `key` so the result fits `max`.
pub fn with_suffix(key: &str, suffix: &str, max: usize) -> Result<String> {
    let suffix_len = suffix.chars().count();
    if suffix_len >= max {
        return Err(SyncError::Validation(format!(
            "key suffix '{suffix}' leaves no room within {max} characters"
        )));
    }
    Ok(format!("{}{}", truncate_chars(key, max - suffix_len), suffix))
}

async fn dispatch_creates(
    ctx: &mut RunContext,
    adapter: &dyn TypeAdapter,
    creates: Vec<PlannedCreate>,
    outcome: &mut UpsertOutcome,
) -> Result<()> {
    if creates.is_empty() {
        return Ok(());
    }
    let definition = adapter.definition();
    let pool = WorkerPool::new(ctx.config.create_concurrency);
    let remote = Arc::clone(&ctx.remote);

    let results = pool
        .run(creates.iter().map(|create| adapter.create(remote.as_ref(), &create.payload)))
        .await;

    let mut fatal = None;
    for (create, result) in creates.into_iter().zip(results) {
        match result {
            Ok(echoed) => {
                // fields the create payload could not carry still count as deployed
                let mut confirmed = create.deployable;
                confirmed.extend(echoed);
                let key = key_of(&confirmed, &definition.key_field).unwrap_or(create.key);
                info!(key = %key, "created");
                outcome.created += 1;
                if definition.cacheable {
                    ctx.cache.put_entity(&definition.type_name, &key, confirmed.clone());
                }
                outcome.confirmed.insert(key, confirmed);
            }
            Err(err) if err.is_fatal() => {
                error!(key = %create.key, error = %err, "create aborted");
                fatal.get_or_insert(err);
            }
            Err(err) => {
                warn!(key = %create.key, error = %err, "create failed");
                outcome.fail(&create.key, &err);
            }
        }
    }
    fatal.map_or(Ok(()), Err)
}

async fn dispatch_updates(
    ctx: &mut RunContext,
    adapter: &dyn TypeAdapter,
    updates: Vec<PlannedUpdate>,
    outcome: &mut UpsertOutcome,
) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }
    let definition = adapter.definition();
    let type_name = definition.type_name.as_str();
    let pool = WorkerPool::new(ctx.config.update_concurrency);
    let remote = Arc::clone(&ctx.remote);
    let remote = remote.as_ref();

    let results = pool
        .run(updates.iter().map(|update| {
            let request = UpdateRequest {
                key: &update.key,
                new_key: update.new_key.as_deref(),
                before: &update.before,
                after: &update.after,
            };
            async move { adapter.update(remote, &request).await }
        }))
        .await;

    let mut fatal = None;
    for (update, result) in updates.into_iter().zip(results) {
        match result {
            Ok(confirmed) => {
                outcome.updated += 1;
                let key = match &update.new_key {
                    Some(new_key) => {
                        finish_rename(ctx, definition, &update, new_key, outcome).await;
                        new_key.clone()
                    }
                    None => update.key.clone(),
                };
                info!(key = %key, "updated");
                if definition.cacheable {
                    ctx.cache.put_entity(type_name, &key, confirmed.clone());
                }
                outcome.confirmed.insert(key, confirmed);
            }
            Err(err) => {
                if let Some(new_key) = &update.new_key {
                    ctx.renames.discard(type_name, new_key);
                }
                if err.is_fatal() {
                    error!(key = %update.key, error = %err, "update aborted");
                    fatal.get_or_insert(err);
                } else {
                    warn!(key = %update.key, error = %err, "update failed");
                    outcome.fail(&update.key, &err);
                }
            }
        }
    }
    fatal.map_or(Ok(()), Err)
}

/// Repoints the cache and local artifacts of a successfully renamed entity.
///
/// The old record is only removed once the record under the new key is
/// written. Local persistence failures are reported against the entity; the
/// remote rename stands either way.
async fn finish_rename(
    ctx: &mut RunContext,
    definition: &TypeDefinition,
    update: &PlannedUpdate,
    new_key: &str,
    outcome: &mut UpsertOutcome,
) {
    let type_name = definition.type_name.as_str();
    let Some(old_key) = ctx.renames.consume(type_name, new_key) else {
        return;
    };
    ctx.cache
        .rename_key(type_name, &definition.key_field, &old_key, new_key);
    outcome.renamed.push((old_key.clone(), new_key.to_string()));

    if let Some(local) = &update.renamed_local {
        if let Err(err) = ctx.store.write_entity(type_name, new_key, local).await {
            warn!(key = %new_key, error = %err, "renamed remotely, old record kept");
            outcome.fail(&update.local_key, &err);
            return;
        }
    }
    match ctx.store.delete_entity(type_name, &update.local_key).await {
        Ok(_) => info!(old_key = %old_key, new_key, "key changed"),
        Err(err) => {
            warn!(key = %update.local_key, error = %err, "could not remove old record");
            outcome.fail(&update.local_key, &err);
        }
    }
}

/// Deletes `keys` of one type remotely, then from the cache and the store.
pub async fn delete(ctx: &mut RunContext, type_name: &str, keys: &[String]) -> Result<DeleteOutcome> {
    let adapter = ctx.registry.adapter(type_name)?;
    let span = info_span!("delete", type_name, count = keys.len());

    async {
        let mut outcome = DeleteOutcome {
            type_name: type_name.to_string(),
            ..DeleteOutcome::default()
        };
        let pool = WorkerPool::new(ctx.config.update_concurrency);
        let remote = Arc::clone(&ctx.remote);

        let results = {
            let cache = &ctx.cache;
            let remote = remote.as_ref();
            let adapter = adapter.as_ref();
            pool.run(keys.iter().map(|key| async move {
                adapter.delete(remote, key, cache.get_by_key(type_name, key)).await
            }))
            .await
        };

        let mut fatal = None;
        for (key, result) in keys.iter().zip(results) {
            match result {
                Ok(()) => {
                    ctx.cache.remove(type_name, key);
                    if let Err(err) = ctx.store.delete_entity(type_name, key).await {
                        warn!(key = %key, error = %err, "could not remove local artifact");
                    }
                    info!(key = %key, "deleted");
                    outcome.deleted.push(key.clone());
                }
                Err(err) if err.is_fatal() => {
                    error!(key = %key, error = %err, "delete aborted");
                    fatal.get_or_insert(err);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "delete failed");
                    outcome.failed.push(EntityFailure::new(key, &err));
                }
            }
        }
        fatal.map_or(Ok(outcome), Err)
    }
    .instrument(span)
    .await
}
