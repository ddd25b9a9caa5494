//! The Write Coordinator (§4.6): orchestrates POST/PUT/PATCH/DELETE with
//! relationship processing, many-to-many pivot sync, and transactional
//! boundaries.
//!
//! Shares its collaborators (registry, storage, gate, hooks, auth) with the
//! read path (`read::ReadContext`); `finalize` hands off to `read::read_one`
//! for the `full` return mode so a written record benefits from the same
//! include expansion and computed-field enrichment a GET would produce.

use crate::codec::Codec;
use crate::config::Tiered;
use crate::error::{Error, Result, Violation};
use crate::gate::{AuthContext, GateRequest, PermissionGate};
use crate::hooks::{HookRegistry, Method, Phase, PhaseContext};
use crate::query_string::ParsedQuery;
use crate::read::{self, ReadContext};
use crate::schema::{CompiledResource, Relationship, ResourceRegistry};
use crate::simplified::{read_to_many_ids, read_to_one_id, PolymorphicRef, SimpleRecord};
use crate::storage::{StorageBackend, Transaction};
use crate::validate::{ValidationMode, Validator, WriteMethod};
use crate::wire::{Document, DocumentData, Identifier, ResourceObject};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

/// The "return record" mode a write resolves to (§4.6, §6): `none` sends an
/// empty body, `minimal` sends only `{type, id}`, `full` re-reads the row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnMode {
    None,
    Minimal,
    Full,
}

/// What a write hands back to the transport collaborator.
#[derive(Debug)]
pub enum WriteOutcome {
    None,
    Minimal(Identifier),
    Document(Document),
}

/// Resolve the effective return mode: call override, but only when the
/// resource enables per-call override (§4.6, §10 precedence: call override
/// -> resource default -> engine default); otherwise the method's default.
pub fn resolve_return_mode(resource: &CompiledResource, default: ReturnMode, requested: Option<ReturnMode>) -> ReturnMode {
    match requested {
        Some(mode) if resource.options.allows_representation_override => mode,
        _ => default,
    }
}

/// Everything a write needs that isn't specific to one request.
pub struct WriteContext<'a> {
    pub registry: &'a ResourceRegistry,
    pub storage: &'a dyn StorageBackend,
    pub gate: &'a dyn PermissionGate,
    pub hooks: &'a HookRegistry,
    pub auth: &'a AuthContext,
    pub default_page_size: Tiered<i64>,
    pub max_page_size: Tiered<i64>,
    /// Reject belongs-to foreign keys sent directly under `attributes`
    /// instead of `relationships` (§4.6, `EngineConfig::strict_foreign_keys`).
    pub strict_foreign_keys: bool,
}

impl<'a> WriteContext<'a> {
    fn as_read_context(&self) -> ReadContext<'a> {
        ReadContext {
            registry: self.registry,
            storage: self.storage,
            gate: self.gate,
            hooks: self.hooks,
            auth: self.auth,
            default_page_size: self.default_page_size.clone(),
            max_page_size: self.max_page_size.clone(),
        }
    }
}

/// A many-to-many relationship update pending after the primary write,
/// carrying the relationship declaration (for its pivot/foreign_key/other_key
/// columns) and the desired full set of related ids.
struct PendingThrough<'r> {
    relationship: &'r Relationship,
    desired_ids: Vec<String>,
}

fn as_id_string(value: &Value) -> Option<String> {
    value.as_str().map(|s| s.to_string()).or_else(|| value.as_i64().map(|n| n.to_string()))
}

fn extract_single(document: &Document) -> Result<&ResourceObject> {
    match &document.data {
        Some(DocumentData::Single(object)) => Ok(object),
        _ => Err(Error::PayloadShape("write payloads must carry a single resource object".into())),
    }
}

/// Reject relationship-owned columns (belongs-to foreign keys, polymorphic
/// type/id pairs) sent directly under `attributes` (§4.6 "rejects belongs-to
/// foreign keys if sent in attributes in strict mode").
fn reject_fk_in_attributes(object: &ResourceObject, resource: &CompiledResource, strict: bool) -> Result<()> {
    if !strict {
        return Ok(());
    }
    let mut violations = Vec::new();
    for relationship in resource.relationships.values() {
        for column in relationship.owned_columns() {
            if object.attributes.contains_key(column) {
                violations.push(
                    Violation::new(format!("/data/attributes/{}", column), "foreign_key_in_attributes").with_detail(format!(
                        "'{}' is owned by relationship '{}'; send it under relationships",
                        column,
                        relationship.alias()
                    )),
                );
            }
        }
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations))
    }
}

/// Split relationship keys out of a decoded record into (a) belongs-to and
/// polymorphic columns merged back into the record's own attributes, and (b)
/// a list of many-to-many operations pending after the primary write (§4.6
/// "Relationship processing"). `HasMany`/`HasManyViaPolymorphic` are derived
/// on read and never accepted on write; any such key is simply dropped.
fn extract_relationship_updates<'r>(record: &mut SimpleRecord, resource: &'r CompiledResource) -> Vec<PendingThrough<'r>> {
    let mut pending = Vec::new();

    for relationship in resource.relationships.values() {
        let alias = relationship.alias().to_string();
        match relationship {
            Relationship::BelongsTo { foreign_key, .. } => {
                if let Some(id) = read_to_one_id(record, &alias) {
                    record.shift_remove(&alias);
                    record.insert(foreign_key.clone(), id.map(Value::String).unwrap_or(Value::Null));
                }
            }
            Relationship::BelongsToPolymorphic { type_field, id_field, .. } => {
                if let Some(raw) = record.shift_remove(&alias) {
                    match PolymorphicRef::from_value(&raw) {
                        Some(pref) => {
                            record.insert(type_field.clone(), Value::String(pref.resource_type));
                            record.insert(id_field.clone(), Value::String(pref.id));
                        }
                        None => {
                            record.insert(type_field.clone(), Value::Null);
                            record.insert(id_field.clone(), Value::Null);
                        }
                    }
                }
            }
            Relationship::HasManyThrough { .. } => {
                if let Some(ids) = read_to_many_ids(record, &alias) {
                    record.shift_remove(&alias);
                    pending.push(PendingThrough { relationship, desired_ids: ids });
                }
            }
            Relationship::HasMany { .. } | Relationship::HasManyViaPolymorphic { .. } => {
                record.shift_remove(&alias);
            }
        }
    }

    pending
}

/// For a PUT that supplied a `relationships` object, every relationship the
/// schema declares but the payload didn't mention is cleared: belongs-to to
/// null, many-to-many to an empty set (§4.6, §9 Open Question 1 — decided:
/// this asymmetry with absent-`relationships` PUTs is preserved as-is).
fn clear_unmentioned_relationships(record: &mut SimpleRecord, resource: &CompiledResource, object: &ResourceObject) {
    let supplied: HashSet<&str> =
        object.relationships.as_ref().map(|r| r.keys().map(|k| k.as_str()).collect()).unwrap_or_default();

    for relationship in resource.relationships.values() {
        let alias = relationship.alias();
        if supplied.contains(alias) {
            continue;
        }
        match relationship {
            Relationship::BelongsTo { .. } | Relationship::BelongsToPolymorphic { .. } => {
                record.insert(alias.to_string(), Value::Null);
            }
            Relationship::HasManyThrough { .. } => {
                record.insert(alias.to_string(), Value::Array(vec![]));
            }
            Relationship::HasMany { .. } | Relationship::HasManyViaPolymorphic { .. } => {}
        }
    }
}

/// Apply declared setters, in dependency order, to whatever values were
/// actually supplied (§4.6 "apply field setters in dependency order").
fn apply_setters(record: &mut SimpleRecord, resource: &CompiledResource) {
    for name in &resource.compute_order {
        let Some(field) = resource.field(name) else { continue };
        let Some(setter) = &field.setter else { continue };
        if let Some(value) = record.get(name).cloned() {
            record.insert(name.clone(), setter(value));
        }
    }
}

/// Verify read permission on one related resource, pre-fetching its minimal
/// record first so the gate can apply row-level policy (§4.8 "read
/// permission is also verified on every referenced related resource").
async fn check_one(ctx: &WriteContext<'_>, tx: &mut dyn Transaction, target: &str, id: &str, pointer: &str) -> Result<()> {
    let target_resource = ctx.registry.require(target)?;
    let minimal = ctx.storage.data_get_minimal(tx, target, id, std::slice::from_ref(&target_resource.id_field)).await?;
    let Some(minimal) = minimal else {
        return Err(Error::Validation(vec![Violation::new(pointer, "related_resource_not_found")
            .with_detail(format!("'{}' with id '{}' does not exist", target, id))]));
    };
    let gate_request = GateRequest { method: Method::Get, resource: target, auth: ctx.auth, minimal_record: Some(&minimal) };
    ctx.gate.check(&gate_request).await
}

/// Check read permission on every belongs-to/polymorphic target and every
/// pending many-to-many target referenced by this write, skipping pivot
/// targets whose relationship opts out of the existence check (§4.6, §4.8,
/// §9 Open Question 2).
async fn check_related_permissions(
    ctx: &WriteContext<'_>,
    tx: &mut dyn Transaction,
    record: &SimpleRecord,
    resource: &CompiledResource,
    pending: &[PendingThrough<'_>],
) -> Result<()> {
    for relationship in resource.relationships.values() {
        match relationship {
            Relationship::BelongsTo { foreign_key, target, alias } => {
                if let Some(id) = record.get(foreign_key).and_then(as_id_string) {
                    check_one(ctx, tx, target, &id, &format!("/data/relationships/{}/data/id", alias)).await?;
                }
            }
            Relationship::BelongsToPolymorphic { type_field, id_field, alias, .. } => {
                let target = record.get(type_field).and_then(|v| v.as_str()).map(|s| s.to_string());
                let id = record.get(id_field).and_then(as_id_string);
                if let (Some(target), Some(id)) = (target, id) {
                    check_one(ctx, tx, &target, &id, &format!("/data/relationships/{}/data/id", alias)).await?;
                }
            }
            Relationship::HasMany { .. } | Relationship::HasManyThrough { .. } | Relationship::HasManyViaPolymorphic { .. } => {}
        }
    }

    for p in pending {
        let Relationship::HasManyThrough { target, skip_existence_check, alias, .. } = p.relationship else { continue };
        if *skip_existence_check {
            continue;
        }
        for id in &p.desired_ids {
            check_one(ctx, tx, target, id, &format!("/data/relationships/{}/data", alias)).await?;
        }
    }

    Ok(())
}

/// Preserving many-to-many sync (§4.6, Testable Property 6): fetch the
/// current pivot rows for `subject_id`, diff against the desired set,
/// delete only removed links, then insert only new ones. Rows kept in both
/// sets are never touched, so their extra pivot attributes survive.
async fn sync_pivots(ctx: &WriteContext<'_>, tx: &mut dyn Transaction, subject_id: &str, pending: &[PendingThrough<'_>]) -> Result<()> {
    for p in pending {
        let Relationship::HasManyThrough { pivot, foreign_key, other_key, .. } = p.relationship else { continue };
        let pivot_resource = ctx.registry.require(pivot)?;

        let current = ctx
            .storage
            .data_fetch_by_column_in(
                tx,
                pivot,
                foreign_key,
                std::slice::from_ref(&subject_id.to_string()),
                &[pivot_resource.id_field.clone(), foreign_key.clone(), other_key.clone()],
            )
            .await?;

        let mut current_by_other: HashMap<String, String> = HashMap::new();
        for row in &current {
            if let (Some(other_id), Some(row_id)) =
                (row.get(other_key).and_then(as_id_string), row.get(&pivot_resource.id_field).and_then(as_id_string))
            {
                current_by_other.insert(other_id, row_id);
            }
        }

        let desired: HashSet<String> = p.desired_ids.iter().cloned().collect();
        let existing: HashSet<String> = current_by_other.keys().cloned().collect();

        for removed in existing.difference(&desired) {
            if let Some(row_id) = current_by_other.get(removed) {
                ctx.storage.data_delete(tx, pivot, row_id).await?;
            }
        }

        for added in desired.difference(&existing) {
            let mut row = SimpleRecord::new();
            row.insert(foreign_key.clone(), Value::String(subject_id.to_string()));
            row.insert(other_key.clone(), Value::String(added.clone()));
            ctx.storage.data_post(tx, pivot, &row).await?;
        }
    }
    Ok(())
}

/// After the primary operation: run `finish`, then build the response per
/// the resolved return mode, re-reading through the GET path for `full`
/// (§4.6 "Finalization").
async fn finalize(
    ctx: &WriteContext<'_>,
    tx: &mut dyn Transaction,
    resource_name: &str,
    id: &str,
    mode: ReturnMode,
    phase_ctx: &mut PhaseContext,
) -> Result<WriteOutcome> {
    ctx.hooks.dispatch(Phase::Finish, phase_ctx).await?;

    match mode {
        ReturnMode::None => Ok(WriteOutcome::None),
        ReturnMode::Minimal => Ok(WriteOutcome::Minimal(Identifier::new(resource_name, id))),
        ReturnMode::Full => {
            let read_ctx = ctx.as_read_context();
            let document = read::read_one(&read_ctx, tx, resource_name, id, &ParsedQuery::default()).await?;
            let document = document.ok_or_else(|| Error::Internal("record vanished after write".into()))?;
            Ok(WriteOutcome::Document(document))
        }
    }
}

/// Create a row (§4.6 "POST").
pub async fn create(
    ctx: &WriteContext<'_>,
    tx: &mut dyn Transaction,
    resource_name: &str,
    document: &Document,
    return_mode_override: Option<ReturnMode>,
) -> Result<WriteOutcome> {
    let resource = ctx.registry.require(resource_name)?;
    let mut phase_ctx = PhaseContext::new(resource_name, Method::Post, Phase::BeforeProcessing);
    ctx.hooks.dispatch(Phase::BeforeProcessing, &mut phase_ctx).await?;

    Validator::validate_write_shape(document, resource, WriteMethod::Post, None)?;
    let object = extract_single(document)?;
    reject_fk_in_attributes(object, resource, ctx.strict_foreign_keys)?;

    ctx.hooks.dispatch(Phase::BeforeSchemaValidate, &mut phase_ctx).await?;
    let mut record = Codec::decode_record(object, resource, ctx.registry, &[])?;

    if record.contains_key(&resource.id_field) && !resource.options.allows_client_ids {
        return Err(Error::Validation(vec![Violation::new("/data/id", "client_ids_not_allowed")
            .with_detail(format!("resource '{}' does not allow client-assigned ids", resource.name))]));
    }

    let pending = extract_relationship_updates(&mut record, resource);
    check_related_permissions(ctx, tx, &record, resource, &pending).await?;

    let gate_request = GateRequest { method: Method::Post, resource: resource_name, auth: ctx.auth, minimal_record: None };
    ctx.gate.check(&gate_request).await?;
    ctx.hooks.dispatch(Phase::CheckPermissions, &mut phase_ctx).await?;

    Validator::validate_attributes(&record, resource, ValidationMode::Full)?;
    ctx.hooks.dispatch(Phase::AfterSchemaValidate, &mut phase_ctx).await?;

    apply_setters(&mut record, resource);

    ctx.hooks.dispatch(Phase::BeforeData, &mut phase_ctx).await?;
    let id = ctx.storage.data_post(tx, resource_name, &record).await?;
    ctx.hooks.dispatch(Phase::AfterDataCall, &mut phase_ctx).await?;

    sync_pivots(ctx, tx, &id, &pending).await?;

    let mode = resolve_return_mode(resource, ReturnMode::Full, return_mode_override);
    finalize(ctx, tx, resource_name, &id, mode, &mut phase_ctx).await
}

/// Full replace (§4.6 "PUT (replace)"). An upsert is a legal outcome when
/// the resource allows client-assigned ids and no row exists yet.
pub async fn replace(
    ctx: &WriteContext<'_>,
    tx: &mut dyn Transaction,
    resource_name: &str,
    id: &str,
    document: &Document,
    return_mode_override: Option<ReturnMode>,
) -> Result<WriteOutcome> {
    let resource = ctx.registry.require(resource_name)?;
    let mut phase_ctx = PhaseContext::new(resource_name, Method::Put, Phase::BeforeProcessing);
    ctx.hooks.dispatch(Phase::BeforeProcessing, &mut phase_ctx).await?;

    Validator::validate_write_shape(document, resource, WriteMethod::Put, Some(id))?;
    let object = extract_single(document)?;
    reject_fk_in_attributes(object, resource, ctx.strict_foreign_keys)?;
    let relationships_supplied = object.relationships.is_some();

    ctx.hooks.dispatch(Phase::BeforeSchemaValidate, &mut phase_ctx).await?;
    let mut record = Codec::decode_record(object, resource, ctx.registry, &[])?;
    if relationships_supplied {
        clear_unmentioned_relationships(&mut record, resource, object);
    }

    let pending = extract_relationship_updates(&mut record, resource);
    check_related_permissions(ctx, tx, &record, resource, &pending).await?;

    let gate_request = GateRequest { method: Method::Put, resource: resource_name, auth: ctx.auth, minimal_record: None };
    ctx.gate.check(&gate_request).await?;
    ctx.hooks.dispatch(Phase::CheckPermissions, &mut phase_ctx).await?;

    Validator::validate_attributes(&record, resource, ValidationMode::Full)?;
    ctx.hooks.dispatch(Phase::AfterSchemaValidate, &mut phase_ctx).await?;

    apply_setters(&mut record, resource);

    if !resource.options.allows_client_ids && !ctx.storage.data_exists(tx, resource_name, id).await? {
        return Err(Error::ResourceNotFound(format!("{}/{}", resource_name, id)));
    }

    ctx.hooks.dispatch(Phase::BeforeData, &mut phase_ctx).await?;
    ctx.storage.data_put(tx, resource_name, id, &record).await?;
    ctx.hooks.dispatch(Phase::AfterDataCall, &mut phase_ctx).await?;

    sync_pivots(ctx, tx, id, &pending).await?;

    let mode = resolve_return_mode(resource, ReturnMode::Full, return_mode_override);
    finalize(ctx, tx, resource_name, id, mode, &mut phase_ctx).await
}

/// Partial update (§4.6 "PATCH"). Unmentioned attributes and relationships
/// are left intact; to-many relationships that are supplied are
/// synchronized.
pub async fn update(
    ctx: &WriteContext<'_>,
    tx: &mut dyn Transaction,
    resource_name: &str,
    id: &str,
    document: &Document,
    return_mode_override: Option<ReturnMode>,
) -> Result<WriteOutcome> {
    let resource = ctx.registry.require(resource_name)?;
    let mut phase_ctx = PhaseContext::new(resource_name, Method::Patch, Phase::BeforeProcessing);
    ctx.hooks.dispatch(Phase::BeforeProcessing, &mut phase_ctx).await?;

    Validator::validate_write_shape(document, resource, WriteMethod::Patch, Some(id))?;
    let object = extract_single(document)?;
    reject_fk_in_attributes(object, resource, ctx.strict_foreign_keys)?;

    let minimal = ctx.storage.data_get_minimal(tx, resource_name, id, std::slice::from_ref(&resource.id_field)).await?;
    let Some(minimal) = minimal else {
        return Err(Error::ResourceNotFound(format!("{}/{}", resource_name, id)));
    };

    ctx.hooks.dispatch(Phase::BeforeSchemaValidate, &mut phase_ctx).await?;
    let mut record = Codec::decode_record(object, resource, ctx.registry, &[])?;

    let pending = extract_relationship_updates(&mut record, resource);
    check_related_permissions(ctx, tx, &record, resource, &pending).await?;

    let gate_request = GateRequest { method: Method::Patch, resource: resource_name, auth: ctx.auth, minimal_record: Some(&minimal) };
    ctx.gate.check(&gate_request).await?;
    ctx.hooks.dispatch(Phase::CheckPermissions, &mut phase_ctx).await?;

    Validator::validate_attributes(&record, resource, ValidationMode::Partial)?;
    ctx.hooks.dispatch(Phase::AfterSchemaValidate, &mut phase_ctx).await?;

    apply_setters(&mut record, resource);

    // Unmentioned relationships never entered `record` (extraction only
    // touches keys the payload supplied), so whether the row itself needs a
    // patch reduces to "did anything besides the id field end up here".
    let has_row_changes = record.keys().any(|k| k != &resource.id_field);

    ctx.hooks.dispatch(Phase::BeforeData, &mut phase_ctx).await?;
    if has_row_changes {
        ctx.storage.data_patch(tx, resource_name, id, &record).await?;
    }
    ctx.hooks.dispatch(Phase::AfterDataCall, &mut phase_ctx).await?;

    sync_pivots(ctx, tx, id, &pending).await?;

    let mode = resolve_return_mode(resource, ReturnMode::Full, return_mode_override);
    finalize(ctx, tx, resource_name, id, mode, &mut phase_ctx).await
}

/// Remove a row (§4.6 "DELETE"). Always a 204, so there is no return mode.
pub async fn delete(ctx: &WriteContext<'_>, tx: &mut dyn Transaction, resource_name: &str, id: &str) -> Result<()> {
    let resource = ctx.registry.require(resource_name)?;
    let mut phase_ctx = PhaseContext::new(resource_name, Method::Delete, Phase::BeforeProcessing);
    ctx.hooks.dispatch(Phase::BeforeProcessing, &mut phase_ctx).await?;

    let minimal = ctx.storage.data_get_minimal(tx, resource_name, id, std::slice::from_ref(&resource.id_field)).await?;
    let Some(minimal) = minimal else {
        return Err(Error::ResourceNotFound(format!("{}/{}", resource_name, id)));
    };

    let gate_request = GateRequest { method: Method::Delete, resource: resource_name, auth: ctx.auth, minimal_record: Some(&minimal) };
    ctx.gate.check(&gate_request).await?;
    ctx.hooks.dispatch(Phase::CheckPermissions, &mut phase_ctx).await?;

    ctx.hooks.dispatch(Phase::BeforeData, &mut phase_ctx).await?;
    ctx.storage.data_delete(tx, resource_name, id).await?;
    ctx.hooks.dispatch(Phase::AfterDataCall, &mut phase_ctx).await?;

    ctx.hooks.dispatch(Phase::Finish, &mut phase_ctx).await?;
    Ok(())
}

/// A boxed, borrow-scoped future: the shape `run_write`'s closure returns,
/// since the closure must borrow the transaction it's handed.
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 't>>;

/// Run `f` inside a transaction, honoring "commit only by the owner of the
/// outermost transaction" (§5). If the caller supplied an existing
/// transaction it is reused and never committed here (`shouldCommit=false`);
/// otherwise a fresh transaction is opened, committed and `AfterCommit`-
/// notified on success, or rolled back and `AfterRollback`-notified on
/// failure. The original error always wins over a failure in the rollback
/// hook itself.
pub async fn run_write<T, F>(
    ctx: &WriteContext<'_>,
    existing_tx: Option<Box<dyn Transaction>>,
    resource_name: &str,
    method: Method,
    f: F,
) -> Result<T>
where
    F: for<'t> FnOnce(&'t mut dyn Transaction) -> TxFuture<'t, T>,
{
    match existing_tx {
        Some(mut owned) => f(owned.as_mut()).await,
        None => {
            let mut owned = ctx.storage.new_transaction().await?;
            match f(owned.as_mut()).await {
                Ok(value) => {
                    ctx.storage.commit(owned).await?;
                    let mut phase_ctx = PhaseContext::new(resource_name, method, Phase::AfterCommit);
                    ctx.hooks.dispatch(Phase::AfterCommit, &mut phase_ctx).await?;
                    Ok(value)
                }
                Err(err) => {
                    let _ = ctx.storage.rollback(owned).await;
                    let mut phase_ctx = PhaseContext::new(resource_name, method, Phase::AfterRollback);
                    let _ = ctx.hooks.dispatch(Phase::AfterRollback, &mut phase_ctx).await;
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::AllowAll;
    use crate::hooks::HookRegistry;
    use crate::schema::field::{Field, FieldKind};
    use crate::schema::resource::{ResourceBuilder, ResourceOptions};
    use crate::schema::ResourceRegistry;
    use crate::storage::{FilterCondition, QueryRequest, QueryResultSet};
    use crate::wire::{Linkage, RelationshipObject, RelationshipsObject};
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use std::any::Any;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct FakeTransaction;
    impl Transaction for FakeTransaction {
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct FakeStorage {
        tables: Mutex<HashMap<String, Vec<SimpleRecord>>>,
        next_id: AtomicU64,
    }

    impl FakeStorage {
        fn new(tables: HashMap<String, Vec<SimpleRecord>>) -> Self {
            Self { tables: Mutex::new(tables), next_id: AtomicU64::new(100) }
        }
    }

    #[async_trait]
    impl StorageBackend for FakeStorage {
        async fn new_transaction(&self) -> Result<Box<dyn Transaction>> {
            Ok(Box::new(FakeTransaction))
        }
        async fn commit(&self, _tx: Box<dyn Transaction>) -> Result<()> {
            Ok(())
        }
        async fn rollback(&self, _tx: Box<dyn Transaction>) -> Result<()> {
            Ok(())
        }
        async fn data_query(&self, _tx: &mut dyn Transaction, resource: &str, _request: &QueryRequest) -> Result<QueryResultSet> {
            let rows = self.tables.lock().unwrap().get(resource).cloned().unwrap_or_default();
            Ok(QueryResultSet { total: Some(rows.len() as i64), rows })
        }
        async fn data_get(&self, _tx: &mut dyn Transaction, resource: &str, id: &str, _columns: &[String]) -> Result<Option<SimpleRecord>> {
            Ok(self
                .tables
                .lock()
                .unwrap()
                .get(resource)
                .and_then(|rows| rows.iter().find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id)).cloned()))
        }
        async fn data_get_minimal(&self, tx: &mut dyn Transaction, resource: &str, id: &str, columns: &[String]) -> Result<Option<SimpleRecord>> {
            self.data_get(tx, resource, id, columns).await
        }
        async fn data_exists(&self, tx: &mut dyn Transaction, resource: &str, id: &str) -> Result<bool> {
            Ok(self.data_get(tx, resource, id, &[]).await?.is_some())
        }
        async fn data_post(&self, _tx: &mut dyn Transaction, resource: &str, record: &SimpleRecord) -> Result<String> {
            let mut record = record.clone();
            let id = match record.get("id").and_then(as_id_string) {
                Some(id) => id,
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
                    record.insert("id".into(), Value::String(id.clone()));
                    id
                }
            };
            self.tables.lock().unwrap().entry(resource.to_string()).or_default().push(record);
            Ok(id)
        }
        async fn data_put(&self, _tx: &mut dyn Transaction, resource: &str, id: &str, record: &SimpleRecord) -> Result<bool> {
            let mut record = record.clone();
            record.insert("id".into(), Value::String(id.to_string()));
            let mut tables = self.tables.lock().unwrap();
            let rows = tables.entry(resource.to_string()).or_default();
            if let Some(existing) = rows.iter_mut().find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id)) {
                *existing = record;
                Ok(false)
            } else {
                rows.push(record);
                Ok(true)
            }
        }
        async fn data_patch(&self, _tx: &mut dyn Transaction, resource: &str, id: &str, record: &SimpleRecord) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            let rows = tables.entry(resource.to_string()).or_default();
            if let Some(existing) = rows.iter_mut().find(|r| r.get("id").and_then(|v| v.as_str()) == Some(id)) {
                for (k, v) in record {
                    existing.insert(k.clone(), v.clone());
                }
            }
            Ok(())
        }
        async fn data_delete(&self, _tx: &mut dyn Transaction, resource: &str, id: &str) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            if let Some(rows) = tables.get_mut(resource) {
                rows.retain(|r| r.get("id").and_then(|v| v.as_str()) != Some(id));
            }
            Ok(())
        }
        async fn data_fetch_by_column_in(
            &self,
            _tx: &mut dyn Transaction,
            resource: &str,
            column: &str,
            values: &[String],
            _columns: &[String],
        ) -> Result<Vec<SimpleRecord>> {
            let rows = self.tables.lock().unwrap().get(resource).cloned().unwrap_or_default();
            Ok(rows.into_iter().filter(|row| row.get(column).and_then(as_id_string).map(|v| values.contains(&v)).unwrap_or(false)).collect())
        }
        fn supports_partitioned_fetch(&self) -> bool {
            false
        }
        async fn data_fetch_partitioned(
            &self,
            _tx: &mut dyn Transaction,
            _resource: &str,
            _partition_column: &str,
            _parent_ids: &[String],
            _order: Option<&crate::query_string::SortTerm>,
            _limit: Option<i64>,
            _columns: &[String],
        ) -> Result<Vec<SimpleRecord>> {
            unimplemented!()
        }
    }

    fn articles_registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        registry.insert(
            ResourceBuilder::new("articles")
                .field(Field::new("title", FieldKind::String).required())
                .field(Field::new("body", FieldKind::String).required())
                .field(Field::new("author_id", FieldKind::String))
                .relationship(Relationship::BelongsTo { alias: "author".into(), foreign_key: "author_id".into(), target: "users".into() })
                .relationship(Relationship::HasManyThrough {
                    alias: "tags".into(),
                    target: "tags".into(),
                    pivot: "article_tags".into(),
                    foreign_key: "article_id".into(),
                    other_key: "tag_id".into(),
                    skip_existence_check: true,
                })
                .options(ResourceOptions { allows_representation_override: true, ..ResourceOptions::default() })
                .compile()
                .unwrap(),
        );
        registry.insert(ResourceBuilder::new("users").field(Field::new("name", FieldKind::String)).compile().unwrap());
        registry.insert(ResourceBuilder::new("tags").field(Field::new("label", FieldKind::String)).compile().unwrap());
        registry.insert(
            ResourceBuilder::new("article_tags")
                .field(Field::new("article_id", FieldKind::String))
                .field(Field::new("tag_id", FieldKind::String))
                .field(Field::new("display_order", FieldKind::Integer))
                .compile()
                .unwrap(),
        );
        registry
    }

    fn write_ctx<'a>(registry: &'a ResourceRegistry, storage: &'a FakeStorage, gate: &'a AllowAll, hooks: &'a HookRegistry, auth: &'a AuthContext) -> WriteContext<'a> {
        WriteContext {
            registry,
            storage,
            gate,
            hooks,
            auth,
            default_page_size: Tiered::new(25),
            max_page_size: Tiered::new(100),
            strict_foreign_keys: true,
        }
    }

    fn record(pairs: &[(&str, Value)]) -> SimpleRecord {
        let mut r = SimpleRecord::new();
        for (k, v) in pairs {
            r.insert((*k).to_string(), v.clone());
        }
        r
    }

    #[tokio::test]
    async fn test_create_missing_required_field_is_422() {
        let registry = articles_registry();
        let storage = FakeStorage::new(HashMap::new());
        let gate = AllowAll;
        let hooks = HookRegistry::new();
        let auth = AuthContext::anonymous();
        let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);
        let mut tx = FakeTransaction;

        let mut attributes = IndexMap::new();
        attributes.insert("title".to_string(), Value::String("t".into()));
        let document = Document::single(ResourceObject { kind: "articles".into(), id: None, attributes, relationships: None, meta: None });

        let err = create(&ctx, &mut tx, "articles", &document, None).await.unwrap_err();
        assert_eq!(err.violations()[0].pointer, "/data/attributes/body");
    }

    #[tokio::test]
    async fn test_create_with_relationship_projects_author_no_fk_attribute() {
        let registry = articles_registry();
        let mut tables = HashMap::new();
        tables.insert("users".to_string(), vec![record(&[("id", Value::String("1".into()))])]);
        let storage = FakeStorage::new(tables);
        let gate = AllowAll;
        let hooks = HookRegistry::new();
        let auth = AuthContext::anonymous();
        let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);
        let mut tx = FakeTransaction;

        let mut attributes = IndexMap::new();
        attributes.insert("title".to_string(), Value::String("t".into()));
        attributes.insert("body".to_string(), Value::String("b".into()));
        let mut relationships = RelationshipsObject::new();
        relationships.insert(
            "author".to_string(),
            RelationshipObject { data: Some(Linkage::ToOne(Some(Identifier::new("users", "1")))), links: None, meta: None },
        );
        let document =
            Document::single(ResourceObject { kind: "articles".into(), id: None, attributes, relationships: Some(relationships), meta: None });

        let outcome = create(&ctx, &mut tx, "articles", &document, Some(ReturnMode::Full)).await.unwrap();
        let WriteOutcome::Document(doc) = outcome else { panic!("expected a document") };
        let object = match doc.data {
            Some(DocumentData::Single(o)) => o,
            other => panic!("unexpected: {:?}", other),
        };
        assert!(!object.attributes.contains_key("author_id"));
        match &object.relationships.unwrap()["author"].data {
            Some(Linkage::ToOne(Some(id))) => assert_eq!(id.id, "1"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_patch_preserves_untouched_attributes_and_relationships() {
        let registry = articles_registry();
        let mut tables = HashMap::new();
        tables.insert(
            "articles".to_string(),
            vec![record(&[
                ("id", Value::String("7".into())),
                ("title", Value::String("A".into())),
                ("body", Value::String("B".into())),
            ])],
        );
        tables.insert(
            "article_tags".to_string(),
            vec![
                record(&[("id", Value::String("p1".into())), ("article_id", Value::String("7".into())), ("tag_id", Value::String("1".into()))]),
                record(&[("id", Value::String("p2".into())), ("article_id", Value::String("7".into())), ("tag_id", Value::String("2".into()))]),
            ],
        );
        let storage = FakeStorage::new(tables);
        let gate = AllowAll;
        let hooks = HookRegistry::new();
        let auth = AuthContext::anonymous();
        let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);
        let mut tx = FakeTransaction;

        let mut attributes = IndexMap::new();
        attributes.insert("title".to_string(), Value::String("C".into()));
        let document = Document::single(ResourceObject {
            kind: "articles".into(),
            id: Some("7".into()),
            attributes,
            relationships: None,
            meta: None,
        });

        update(&ctx, &mut tx, "articles", "7", &document, Some(ReturnMode::None)).await.unwrap();

        let parsed = ParsedQuery::default();
        let read_ctx = ctx.as_read_context();
        let doc = read::read_one(&read_ctx, &mut tx, "articles", "7", &parsed).await.unwrap().unwrap();
        let object = match doc.data {
            Some(DocumentData::Single(o)) => o,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(object.attributes["title"], Value::String("C".into()));
        assert_eq!(object.attributes["body"], Value::String("B".into()));

        let pivots = storage.tables.lock().unwrap().get("article_tags").cloned().unwrap();
        assert_eq!(pivots.len(), 2);
    }

    #[tokio::test]
    async fn test_put_nulls_unmentioned_relationships_only_when_object_present() {
        let registry = articles_registry();
        let mut tables = HashMap::new();
        tables.insert(
            "articles".to_string(),
            vec![record(&[
                ("id", Value::String("7".into())),
                ("title", Value::String("A".into())),
                ("body", Value::String("B".into())),
                ("author_id", Value::String("1".into())),
            ])],
        );
        let storage = FakeStorage::new(tables);
        let gate = AllowAll;
        let hooks = HookRegistry::new();
        let auth = AuthContext::anonymous();
        let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);
        let mut tx = FakeTransaction;

        let mut attributes = IndexMap::new();
        attributes.insert("title".to_string(), Value::String("A2".into()));
        attributes.insert("body".to_string(), Value::String("B2".into()));
        let document_no_relationships =
            Document::single(ResourceObject { kind: "articles".into(), id: Some("7".into()), attributes: attributes.clone(), relationships: None, meta: None });

        replace(&ctx, &mut tx, "articles", "7", &document_no_relationships, Some(ReturnMode::None)).await.unwrap();
        let stored = storage.data_get(&mut tx, "articles", "7", &[]).await.unwrap().unwrap();
        assert_eq!(stored.get("author_id"), Some(&Value::String("1".into())));

        let document_with_empty_relationships = Document::single(ResourceObject {
            kind: "articles".into(),
            id: Some("7".into()),
            attributes,
            relationships: Some(RelationshipsObject::new()),
            meta: None,
        });
        replace(&ctx, &mut tx, "articles", "7", &document_with_empty_relationships, Some(ReturnMode::None)).await.unwrap();
        let stored = storage.data_get(&mut tx, "articles", "7", &[]).await.unwrap().unwrap();
        assert_eq!(stored.get("author_id"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_many_to_many_preserving_sync_keeps_kept_rows() {
        let registry = articles_registry();
        let mut tables = HashMap::new();
        tables.insert(
            "articles".to_string(),
            vec![record(&[("id", Value::String("9".into())), ("title", Value::String("x".into())), ("body", Value::String("y".into()))])],
        );
        tables.insert(
            "article_tags".to_string(),
            vec![
                record(&[
                    ("id", Value::String("p1".into())),
                    ("article_id", Value::String("9".into())),
                    ("tag_id", Value::String("1".into())),
                    ("display_order", Value::from(1)),
                ]),
                record(&[
                    ("id", Value::String("p2".into())),
                    ("article_id", Value::String("9".into())),
                    ("tag_id", Value::String("2".into())),
                    ("display_order", Value::from(2)),
                ]),
                record(&[
                    ("id", Value::String("p3".into())),
                    ("article_id", Value::String("9".into())),
                    ("tag_id", Value::String("3".into())),
                    ("display_order", Value::from(3)),
                ]),
            ],
        );
        let storage = FakeStorage::new(tables);
        let gate = AllowAll;
        let hooks = HookRegistry::new();
        let auth = AuthContext::anonymous();
        let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);
        let mut tx = FakeTransaction;

        let mut attributes = IndexMap::new();
        attributes.insert("title".to_string(), Value::String("x".into()));
        attributes.insert("body".to_string(), Value::String("y".into()));
        let mut relationships = RelationshipsObject::new();
        relationships.insert(
            "tags".to_string(),
            RelationshipObject {
                data: Some(Linkage::ToMany(vec![Identifier::new("tags", "2"), Identifier::new("tags", "3"), Identifier::new("tags", "4")])),
                links: None,
                meta: None,
            },
        );
        let document =
            Document::single(ResourceObject { kind: "articles".into(), id: Some("9".into()), attributes, relationships: Some(relationships), meta: None });

        replace(&ctx, &mut tx, "articles", "9", &document, Some(ReturnMode::None)).await.unwrap();

        let pivots = storage.tables.lock().unwrap().get("article_tags").cloned().unwrap();
        assert_eq!(pivots.len(), 3);
        let kept_p2 = pivots.iter().find(|r| r.get("id").and_then(|v| v.as_str()) == Some("p2")).unwrap();
        assert_eq!(kept_p2.get("display_order"), Some(&Value::from(2)));
        let kept_p3 = pivots.iter().find(|r| r.get("id").and_then(|v| v.as_str()) == Some("p3")).unwrap();
        assert_eq!(kept_p3.get("display_order"), Some(&Value::from(3)));
        assert!(!pivots.iter().any(|r| r.get("tag_id").and_then(|v| v.as_str()) == Some("1")));
        assert!(pivots.iter().any(|r| r.get("tag_id").and_then(|v| v.as_str()) == Some("4")));
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let registry = articles_registry();
        let mut tables = HashMap::new();
        tables.insert("articles".to_string(), vec![record(&[("id", Value::String("1".into())), ("title", Value::String("t".into()))])]);
        let storage = FakeStorage::new(tables);
        let gate = AllowAll;
        let hooks = HookRegistry::new();
        let auth = AuthContext::anonymous();
        let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);
        let mut tx = FakeTransaction;

        delete(&ctx, &mut tx, "articles", "1").await.unwrap();
        assert!(storage.data_get(&mut tx, "articles", "1", &[]).await.unwrap().is_none());

        let err = delete(&ctx, &mut tx, "articles", "1").await.unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_run_write_commits_owned_transaction() {
        let registry = articles_registry();
        let storage = FakeStorage::new(HashMap::new());
        let gate = AllowAll;
        let hooks = HookRegistry::new();
        let auth = AuthContext::anonymous();
        let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);

        let mut attributes = IndexMap::new();
        attributes.insert("title".to_string(), Value::String("t".into()));
        attributes.insert("body".to_string(), Value::String("b".into()));
        let document = Document::single(ResourceObject { kind: "articles".into(), id: None, attributes, relationships: None, meta: None });

        let outcome = run_write(&ctx, None, "articles", Method::Post, |tx| {
            Box::pin(async { create(&ctx, tx, "articles", &document, Some(ReturnMode::Minimal)).await })
        })
        .await
        .unwrap();

        assert!(matches!(outcome, WriteOutcome::Minimal(_)));
        assert_eq!(storage.tables.lock().unwrap().get("articles").unwrap().len(), 1);
    }

    #[allow(dead_code)]
    fn use_filter_condition(_: FilterCondition) {}
}
