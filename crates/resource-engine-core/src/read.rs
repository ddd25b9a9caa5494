//! Read-path orchestration (§2's control flow, applied to `GET`): Validator
//! -> Query Planner -> Permission Gate -> Storage Executor -> include
//! expansion -> computed-field enrichment -> Payload Codec.

use crate::codec::Codec;
use crate::config::Tiered;
use crate::error::Result;
use crate::gate::{AuthContext, GateRequest, PermissionGate};
use crate::hooks::{HookRegistry, Method, Phase, PhaseContext};
use crate::plan::{self, FieldSelectionPlan, IncludeNode};
use crate::query_string::ParsedQuery;
use crate::schema::{CompiledResource, Relationship, ResourceRegistry};
use crate::simplified::{read_to_one_id, PolymorphicRef, SimpleRecord};
use crate::storage::{normalize_value, StorageBackend, Transaction};
use crate::validate::Validator;
use crate::wire::{Document, ResourceObject};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Everything a read needs that isn't specific to one request: the
/// registry, the storage collaborator, the permission gate, the hook
/// registry, and the caller's auth context.
pub struct ReadContext<'a> {
    pub registry: &'a ResourceRegistry,
    pub storage: &'a dyn StorageBackend,
    pub gate: &'a dyn PermissionGate,
    pub hooks: &'a HookRegistry,
    pub auth: &'a AuthContext,
    pub default_page_size: Tiered<i64>,
    pub max_page_size: Tiered<i64>,
}

impl ReadContext<'_> {
    fn page_size_tiers(&self, resource: &CompiledResource) -> (Tiered<i64>, Tiered<i64>) {
        let mut default_size = self.default_page_size.clone();
        if let Some(v) = resource.options.default_page_size {
            default_size = default_size.with_resource_default(v);
        }
        let mut max_size = self.max_page_size.clone();
        if let Some(v) = resource.options.max_page_size {
            max_size = max_size.with_resource_default(v);
        }
        (default_size, max_size)
    }
}

/// Fetch a single resource by id. The Permission Gate is checked against a
/// minimal pre-fetch before the full row is loaded (§4.8).
pub async fn read_one(
    ctx: &ReadContext<'_>,
    tx: &mut dyn Transaction,
    resource_name: &str,
    id: &str,
    parsed: &ParsedQuery,
) -> Result<Option<Document>> {
    let resource = ctx.registry.require(resource_name)?;
    let include_depth_limit = resource.options.include_depth_limit.unwrap_or(3);
    let (_, max_size) = ctx.page_size_tiers(resource);

    let mut phase_ctx = PhaseContext::new(resource_name, Method::Get, Phase::BeforeProcessing);
    ctx.hooks.dispatch(Phase::BeforeProcessing, &mut phase_ctx).await?;

    Validator::validate_read_request(parsed, resource, ctx.registry, include_depth_limit, max_size.resolve())?;

    let minimal = ctx
        .storage
        .data_get_minimal(tx, resource_name, id, std::slice::from_ref(&resource.id_field))
        .await?;
    let Some(minimal) = minimal else { return Ok(None) };

    let gate_request = GateRequest {
        method: Method::Get,
        resource: resource_name,
        auth: ctx.auth,
        minimal_record: Some(&minimal),
    };
    ctx.gate.check(&gate_request).await?;
    ctx.hooks.dispatch(Phase::CheckPermissions, &mut phase_ctx).await?;

    let fields = parsed.fields.get(resource_name).map(|v| v.as_slice());
    let plan = plan::plan_single(resource, ctx.registry, fields, &parsed.include, include_depth_limit)?;

    ctx.hooks.dispatch(Phase::BeforeData, &mut phase_ctx).await?;
    let Some(record) = ctx.storage.data_get(tx, resource_name, id, &plan.query_request.columns).await? else {
        return Ok(None);
    };
    ctx.hooks.dispatch(Phase::AfterDataCall, &mut phase_ctx).await?;

    let mut rows = vec![record];
    let mut included = Vec::new();
    let mut seen = HashSet::new();
    hydrate_rows(ctx, tx, resource, &mut rows, &plan.selection, &plan.include, &parsed.fields, &mut included, &mut seen).await?;

    phase_ctx.phase = Phase::EnrichRecord;
    phase_ctx.record = rows.first().cloned();
    ctx.hooks.dispatch(Phase::EnrichRecord, &mut phase_ctx).await?;

    let object = Codec::encode_record(&rows[0], resource);
    let mut document = Document::single(object);
    document.included = included;
    Ok(Some(document))
}

/// Fetch a collection, honoring filters, sort, pagination, and include
/// (§4.4, §4.5).
pub async fn read_many(
    ctx: &ReadContext<'_>,
    tx: &mut dyn Transaction,
    resource_name: &str,
    parsed: &ParsedQuery,
) -> Result<Document> {
    let resource = ctx.registry.require(resource_name)?;
    let include_depth_limit = resource.options.include_depth_limit.unwrap_or(3);
    let (default_size, max_size) = ctx.page_size_tiers(resource);

    let mut phase_ctx = PhaseContext::new(resource_name, Method::Get, Phase::BeforeProcessing);
    ctx.hooks.dispatch(Phase::BeforeProcessing, &mut phase_ctx).await?;

    Validator::validate_read_request(parsed, resource, ctx.registry, include_depth_limit, max_size.resolve())?;

    let gate_request = GateRequest {
        method: Method::Get,
        resource: resource_name,
        auth: ctx.auth,
        minimal_record: None,
    };
    ctx.gate.check(&gate_request).await?;
    ctx.hooks.dispatch(Phase::CheckPermissions, &mut phase_ctx).await?;

    let plan = plan::plan_read(resource, ctx.registry, parsed, &default_size, &max_size, include_depth_limit, true)?;

    ctx.hooks.dispatch(Phase::BeforeData, &mut phase_ctx).await?;
    let result = ctx.storage.data_query(tx, resource_name, &plan.query_request).await?;
    ctx.hooks.dispatch(Phase::AfterDataCall, &mut phase_ctx).await?;

    let mut rows = result.rows;
    let mut included = Vec::new();
    let mut seen = HashSet::new();
    hydrate_rows(ctx, tx, resource, &mut rows, &plan.selection, &plan.include, &parsed.fields, &mut included, &mut seen).await?;

    let meta = result.total.map(|total| serde_json::json!({ "total": total }));
    Ok(Codec::encode_collection(&rows, resource, included, meta))
}

/// Normalize, project relationships, recurse into includes, and enrich
/// computed fields for one batch of rows of the same resource type. Shared
/// by the top-level call and by each level of include recursion.
#[allow(clippy::too_many_arguments)]
async fn hydrate_rows(
    ctx: &ReadContext<'_>,
    tx: &mut dyn Transaction,
    resource: &CompiledResource,
    rows: &mut Vec<SimpleRecord>,
    selection: &FieldSelectionPlan,
    include: &[IncludeNode],
    fields_by_type: &HashMap<String, Vec<String>>,
    included: &mut Vec<ResourceObject>,
    seen: &mut HashSet<(String, String)>,
) -> Result<()> {
    for row in rows.iter_mut() {
        normalize_row(row, resource);
        project_to_one_relationships(row, resource);
    }

    for node in include {
        expand_include_node(ctx, tx, resource, rows, node, fields_by_type, included, seen).await?;
    }

    for row in rows.iter_mut() {
        enrich_computed(row, resource, selection);
    }

    Ok(())
}

/// Database-typed value coercion (§4.5 "Post-fetch it normalizes...").
fn normalize_row(record: &mut SimpleRecord, resource: &CompiledResource) {
    for (name, field) in &resource.fields {
        if let Some(value) = record.get(name).cloned() {
            record.insert(name.clone(), normalize_value(field.kind, value));
        }
    }
}

/// Turns the raw foreign-key / polymorphic columns of a to-one relationship
/// into `record[alias]`, and removes the raw columns — "the foreign key
/// column itself never appears among attributes".
fn project_to_one_relationships(record: &mut SimpleRecord, resource: &CompiledResource) {
    for relationship in resource.relationships.values() {
        match relationship {
            Relationship::BelongsTo { alias, foreign_key, .. } => {
                let value = record.shift_remove(foreign_key).unwrap_or(Value::Null);
                record.insert(alias.clone(), value);
            }
            Relationship::BelongsToPolymorphic { alias, type_field, id_field, .. } => {
                let type_value = record.shift_remove(type_field);
                let id_value = record.shift_remove(id_field);
                let projected = match (type_value, id_value) {
                    (Some(Value::String(resource_type)), Some(id_value)) if !resource_type.is_empty() => {
                        let id = id_value.as_str().map(|s| s.to_string()).or_else(|| id_value.as_i64().map(|n| n.to_string()));
                        id.map(|id| PolymorphicRef { id, resource_type }.to_value()).unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                };
                record.insert(alias.clone(), projected);
            }
            Relationship::HasMany { .. } | Relationship::HasManyThrough { .. } | Relationship::HasManyViaPolymorphic { .. } => {}
        }
    }
}

fn enrich_computed(record: &mut SimpleRecord, resource: &CompiledResource, selection: &FieldSelectionPlan) {
    for name in &resource.compute_order {
        if !selection.computed_fields.iter().any(|c| c == name) {
            continue;
        }
        let Some(field) = resource.field(name) else { continue };
        let Some(spec) = &field.computed else { continue };
        let value = (spec.compute)(record);
        record.insert(name.clone(), value);
    }
    for auxiliary in &selection.auxiliary_columns {
        record.shift_remove(auxiliary);
    }
}

fn row_ids(rows: &[SimpleRecord], resource: &CompiledResource) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|row| row.get(&resource.id_field).and_then(value_as_id_string))
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn value_as_id_string(value: &Value) -> Option<String> {
    value.as_str().map(|s| s.to_string()).or_else(|| value.as_i64().map(|n| n.to_string()))
}

/// Push a freshly-fetched, fully-hydrated set of target rows into the
/// deduplicated `included` list, keyed by (type, id).
fn push_included(target_resource: &CompiledResource, rows: &[SimpleRecord], included: &mut Vec<ResourceObject>, seen: &mut HashSet<(String, String)>) {
    for row in rows {
        let Some(id) = row.get(&target_resource.id_field).and_then(value_as_id_string) else { continue };
        let key = (target_resource.name.clone(), id);
        if !seen.insert(key) {
            continue;
        }
        included.push(Codec::encode_record(row, target_resource));
    }
}

/// Sparse-fieldset-aware column selection for an included resource type.
fn included_selection(resource: &CompiledResource, fields_by_type: &HashMap<String, Vec<String>>) -> Result<FieldSelectionPlan> {
    let requested = fields_by_type.get(&resource.name).map(|v| v.as_slice());
    plan::select_fields(resource, requested)
}

/// Expand one node of the include tree against an already-hydrated batch of
/// parent rows (§4.5 "Include expansion").
#[allow(clippy::too_many_arguments)]
async fn expand_include_node(
    ctx: &ReadContext<'_>,
    tx: &mut dyn Transaction,
    parent_resource: &CompiledResource,
    parent_rows: &mut [SimpleRecord],
    node: &IncludeNode,
    fields_by_type: &HashMap<String, Vec<String>>,
    included: &mut Vec<ResourceObject>,
    seen: &mut HashSet<(String, String)>,
) -> Result<()> {
    let Some(relationship) = parent_resource.relationship(&node.relationship).cloned() else {
        return Ok(());
    };
    let target_resource = ctx.registry.require(&node.target_resource)?;
    let selection = included_selection(target_resource, fields_by_type)?;

    let mut target_rows = match &relationship {
        Relationship::BelongsTo { alias, .. } => {
            let ids: Vec<String> = parent_rows
                .iter()
                .filter_map(|row| read_to_one_id(row, alias).flatten())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if ids.is_empty() {
                Vec::new()
            } else {
                ctx.storage
                    .data_fetch_by_column_in(tx, &target_resource.name, &target_resource.id_field, &ids, &selection.columns)
                    .await?
            }
        }
        Relationship::HasMany { foreign_key, .. } => {
            let parent_ids = row_ids(parent_rows, parent_resource);
            if parent_ids.is_empty() {
                Vec::new()
            } else if (node.per_parent_limit.is_some() || node.order.is_some()) && ctx.storage.supports_partitioned_fetch() {
                ctx.storage
                    .data_fetch_partitioned(
                        tx,
                        &target_resource.name,
                        foreign_key,
                        &parent_ids,
                        node.order.as_ref(),
                        node.per_parent_limit,
                        &selection.columns,
                    )
                    .await?
            } else {
                let mut all = ctx
                    .storage
                    .data_fetch_by_column_in(tx, &target_resource.name, foreign_key, &parent_ids, &selection.columns)
                    .await?;
                if node.per_parent_limit.is_some() || node.order.is_some() {
                    group_order_and_limit(&mut all, foreign_key, node);
                }
                all
            }
        }
        Relationship::HasManyThrough { pivot, foreign_key, other_key, .. } => {
            let parent_ids = row_ids(parent_rows, parent_resource);
            if parent_ids.is_empty() {
                Vec::new()
            } else {
                let pivot_columns = vec![foreign_key.clone(), other_key.clone()];
                let pivot_rows = ctx
                    .storage
                    .data_fetch_by_column_in(tx, pivot, foreign_key, &parent_ids, &pivot_columns)
                    .await?;
                let other_ids: Vec<String> = pivot_rows
                    .iter()
                    .filter_map(|row| row.get(other_key).and_then(value_as_id_string))
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                let fetched = if other_ids.is_empty() {
                    Vec::new()
                } else {
                    ctx.storage
                        .data_fetch_by_column_in(tx, &target_resource.name, &target_resource.id_field, &other_ids, &selection.columns)
                        .await?
                };
                assign_pivot_linkage(parent_rows, parent_resource, &relationship, &pivot_rows, &fetched, target_resource, node);
                fetched
            }
        }
        Relationship::HasManyViaPolymorphic { alias, type_field, id_field, owner_type_value, .. } => {
            let parent_ids = row_ids(parent_rows, parent_resource);
            if parent_ids.is_empty() {
                Vec::new()
            } else {
                let mut columns = selection.columns.clone();
                if !columns.contains(type_field) {
                    columns.push(type_field.clone());
                }
                if !columns.contains(id_field) {
                    columns.push(id_field.clone());
                }
                let fetched = ctx
                    .storage
                    .data_fetch_by_column_in(tx, &target_resource.name, id_field, &parent_ids, &columns)
                    .await?;
                let matching: Vec<SimpleRecord> = fetched
                    .into_iter()
                    .filter(|row| row.get(type_field).and_then(|v| v.as_str()) == Some(owner_type_value.as_str()))
                    .collect();
                assign_has_many_linkage(parent_rows, parent_resource, alias, id_field, &matching, target_resource);
                matching
            }
        }
        Relationship::BelongsToPolymorphic { alias, .. } => {
            let refs: Vec<PolymorphicRef> = parent_rows
                .iter()
                .filter_map(|row| row.get(alias))
                .filter_map(PolymorphicRef::from_value)
                .collect();
            let mut by_type: HashMap<String, Vec<String>> = HashMap::new();
            for r in &refs {
                by_type.entry(r.resource_type.clone()).or_default().push(r.id.clone());
            }
            let mut fetched = Vec::new();
            for (type_name, ids) in by_type {
                let Ok(type_resource) = ctx.registry.require(&type_name) else { continue };
                let type_selection = included_selection(type_resource, fields_by_type)?;
                let unique: Vec<String> = ids.into_iter().collect::<HashSet<_>>().into_iter().collect();
                let rows = ctx
                    .storage
                    .data_fetch_by_column_in(tx, &type_name, &type_resource.id_field, &unique, &type_selection.columns)
                    .await?;
                let mut rows = rows;
                hydrate_rows(ctx, tx, type_resource, &mut rows, &type_selection, &node.children, fields_by_type, included, seen).await?;
                push_included(type_resource, &rows, included, seen);
                fetched.extend(rows);
            }
            return Ok(());
        }
    };

    if !matches!(relationship, Relationship::HasManyThrough { .. } | Relationship::HasManyViaPolymorphic { .. }) {
        match &relationship {
            Relationship::HasMany { alias, foreign_key, .. } => {
                assign_has_many_linkage(parent_rows, parent_resource, alias, foreign_key, &target_rows, target_resource);
            }
            Relationship::BelongsTo { .. } => {
                // to-one linkage already present on the parent row via
                // `project_to_one_relationships`; nothing further to assign.
            }
            _ => {}
        }
    }

    hydrate_rows(ctx, tx, target_resource, &mut target_rows, &selection, &node.children, fields_by_type, included, seen).await?;
    push_included(target_resource, &target_rows, included, seen);

    Ok(())
}

/// Group rows by `foreign_key`, apply `node`'s order and per-parent limit
/// within each group (the correlated-group fallback when the backend lacks
/// window-function support, §4.5).
fn group_order_and_limit(rows: &mut Vec<SimpleRecord>, foreign_key: &str, node: &IncludeNode) {
    let mut groups: HashMap<String, Vec<SimpleRecord>> = HashMap::new();
    for row in rows.drain(..) {
        let key = row.get(foreign_key).and_then(value_as_id_string).unwrap_or_default();
        groups.entry(key).or_default().push(row);
    }

    let mut out = Vec::new();
    for (_, mut group) in groups {
        if let Some(order) = &node.order {
            group.sort_by(|a, b| {
                let av = a.get(&order.field);
                let bv = b.get(&order.field);
                let ordering = compare_values(av, bv);
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        if let Some(limit) = node.per_parent_limit {
            group.truncate(limit.max(0) as usize);
        }
        out.extend(group);
    }
    *rows = out;
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(std::cmp::Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => std::cmp::Ordering::Equal,
    }
}

fn assign_has_many_linkage(
    parent_rows: &mut [SimpleRecord],
    parent_resource: &CompiledResource,
    alias: &str,
    foreign_key: &str,
    target_rows: &[SimpleRecord],
    target_resource: &CompiledResource,
) {
    let mut by_parent: HashMap<String, Vec<String>> = HashMap::new();
    for row in target_rows {
        let Some(parent_id) = row.get(foreign_key).and_then(value_as_id_string) else { continue };
        let Some(target_id) = row.get(&target_resource.id_field).and_then(value_as_id_string) else { continue };
        by_parent.entry(parent_id).or_default().push(target_id);
    }

    for row in parent_rows.iter_mut() {
        let Some(parent_id) = row.get(&parent_resource.id_field).and_then(value_as_id_string) else { continue };
        let ids = by_parent.get(&parent_id).cloned().unwrap_or_default();
        row.insert(alias.to_string(), Value::Array(ids.into_iter().map(Value::String).collect()));
    }
}

fn assign_pivot_linkage(
    parent_rows: &mut [SimpleRecord],
    parent_resource: &CompiledResource,
    relationship: &Relationship,
    pivot_rows: &[SimpleRecord],
    target_rows: &[SimpleRecord],
    target_resource: &CompiledResource,
    node: &IncludeNode,
) {
    let Relationship::HasManyThrough { alias, foreign_key, other_key, .. } = relationship else { return };
    let known_targets: HashSet<String> =
        target_rows.iter().filter_map(|r| r.get(&target_resource.id_field).and_then(value_as_id_string)).collect();

    let mut by_parent: HashMap<String, Vec<String>> = HashMap::new();
    for row in pivot_rows {
        let Some(parent_id) = row.get(foreign_key).and_then(value_as_id_string) else { continue };
        let Some(other_id) = row.get(other_key).and_then(value_as_id_string) else { continue };
        if !known_targets.contains(&other_id) {
            continue;
        }
        by_parent.entry(parent_id).or_default().push(other_id);
    }

    for row in parent_rows.iter_mut() {
        let Some(parent_id) = row.get(&parent_resource.id_field).and_then(value_as_id_string) else { continue };
        let mut ids = by_parent.get(&parent_id).cloned().unwrap_or_default();
        if node.per_parent_limit.is_some() {
            ids.truncate(node.per_parent_limit.unwrap().max(0) as usize);
        }
        row.insert(alias.clone(), Value::Array(ids.into_iter().map(Value::String).collect()));
    }
}
