//! In-memory fixtures shared by the scenario tests under `tests/`.
//!
//! `FakeStorage` implements the seven-procedure `StorageBackend` contract
//! (§6) entirely in memory, so the Resource Engine's read/write control flow
//! can be exercised end-to-end without a live database — mirroring the
//! `FakeStorage` test doubles colocated with `read.rs`/`write.rs`, but
//! fleshed out enough to actually execute every write method instead of
//! only the subset each unit test needs.

use async_trait::async_trait;
use resource_engine_core::error::Result;
use resource_engine_core::query_string::{PageParams, SortTerm};
use resource_engine_core::schema::{Field, FieldKind, ResourceBuilder, ResourceRegistry};
use resource_engine_core::simplified::SimpleRecord;
use resource_engine_core::storage::{normalize_value, FilterCondition, QueryRequest, QueryResultSet, StorageBackend, Transaction};
use resource_engine_core::Relationship;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct FakeTransaction;

impl Transaction for FakeTransaction {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn as_id_string(value: &Value) -> Option<String> {
    value.as_str().map(|s| s.to_string()).or_else(|| value.as_i64().map(|n| n.to_string()))
}

fn value_as_sortable(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Project a stored row down to the requested columns, the way a real
/// backend's `SELECT <columns>` would. An empty column list is treated as
/// "no projection" rather than "select nothing", since no caller in this
/// engine's control flow passes an empty list with output in mind.
fn project_row(row: &SimpleRecord, columns: &[String]) -> SimpleRecord {
    if columns.is_empty() {
        return row.clone();
    }
    let mut projected = SimpleRecord::new();
    for column in columns {
        if let Some(value) = row.get(column) {
            projected.insert(column.clone(), value.clone());
        }
    }
    projected
}

fn filter_matches(row: &SimpleRecord, condition: &FilterCondition) -> bool {
    use resource_engine_core::schema::FilterOperator::*;
    let Some(raw) = row.get(&condition.field) else { return false };
    let actual = value_as_sortable(raw);
    match condition.operator {
        Eq => actual == condition.value,
        Ne => actual != condition.value,
        Like | ILike => actual.to_lowercase().contains(&condition.value.to_lowercase().replace('%', "")),
        Gt | Gte | Lt | Lte => {
            let (Ok(a), Ok(b)) = (actual.parse::<f64>(), condition.value.parse::<f64>()) else {
                return false;
            };
            match condition.operator {
                Gt => a > b,
                Gte => a >= b,
                Lt => a < b,
                Lte => a <= b,
                _ => unreachable!(),
            }
        }
    }
}

/// A single in-memory table, keyed by its own rows' `id` values.
struct Table {
    rows: Vec<SimpleRecord>,
    next_id: u64,
}

impl Default for Table {
    fn default() -> Self {
        Self { rows: Vec::new(), next_id: 1 }
    }
}

/// An in-memory `StorageBackend`. Auto-assigns numeric ids on `data_post`
/// unless the caller already supplied one (client-assigned id support,
/// §3 "upsert is a legal PUT outcome").
pub struct FakeStorage {
    registry: ResourceRegistry,
    tables: Mutex<HashMap<String, Table>>,
}

impl FakeStorage {
    pub fn new(registry: ResourceRegistry) -> Self {
        Self { registry, tables: Mutex::new(HashMap::new()) }
    }

    /// Seed a row directly, bypassing the write coordinator. Used to set up
    /// scenario fixtures (§8's scenario seeds assume pre-existing rows).
    pub fn seed(&self, resource: &str, row: SimpleRecord) {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(resource.to_string()).or_default();
        if let Some(id) = row.get("id").and_then(as_id_string) {
            if let Ok(n) = id.parse::<u64>() {
                table.next_id = table.next_id.max(n + 1);
            }
        }
        table.rows.push(row);
    }

    pub fn snapshot(&self, resource: &str) -> Vec<SimpleRecord> {
        self.tables.lock().unwrap().get(resource).map(|t| t.rows.clone()).unwrap_or_default()
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

    async fn data_query(&self, _tx: &mut dyn Transaction, resource: &str, request: &QueryRequest) -> Result<QueryResultSet> {
        let tables = self.tables.lock().unwrap();
        let mut rows: Vec<SimpleRecord> = tables.get(resource).map(|t| t.rows.clone()).unwrap_or_default();

        // Filters and sort read against the full stored row (they may
        // reference columns outside the projected selection), so they run
        // before projection.
        rows.retain(|row| request.filters.iter().all(|f| filter_matches(row, f)));

        for term in request.sort.iter().rev() {
            rows.sort_by(|a, b| {
                let av = a.get(&term.field).map(value_as_sortable).unwrap_or_default();
                let bv = b.get(&term.field).map(value_as_sortable).unwrap_or_default();
                let ordering = av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal);
                if term.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let total = rows.len() as i64;

        let paged = match &request.page {
            PageParams::None => rows,
            PageParams::NumberSize { number, size } => {
                let size = size.unwrap_or(total.max(1)) as usize;
                let number = number.unwrap_or(1).max(1) as usize;
                let start = (number - 1) * size;
                rows.into_iter().skip(start).take(size).collect()
            }
            PageParams::OffsetLimit { offset, limit } => {
                let offset = offset.unwrap_or(0).max(0) as usize;
                let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);
                rows.into_iter().skip(offset).take(limit).collect()
            }
        };

        let projected = paged.iter().map(|row| project_row(row, &request.columns)).collect();
        Ok(QueryResultSet { rows: projected, total: request.count_total.then_some(total) })
    }

    async fn data_get(&self, _tx: &mut dyn Transaction, resource: &str, id: &str, columns: &[String]) -> Result<Option<SimpleRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(resource)
            .and_then(|t| t.rows.iter().find(|r| r.get("id").and_then(as_id_string).as_deref() == Some(id)))
            .map(|row| project_row(row, columns)))
    }

    async fn data_get_minimal(&self, tx: &mut dyn Transaction, resource: &str, id: &str, columns: &[String]) -> Result<Option<SimpleRecord>> {
        self.data_get(tx, resource, id, columns).await
    }

    async fn data_exists(&self, tx: &mut dyn Transaction, resource: &str, id: &str) -> Result<bool> {
        Ok(self.data_get(tx, resource, id, &[]).await?.is_some())
    }

    async fn data_post(&self, _tx: &mut dyn Transaction, resource: &str, record: &SimpleRecord) -> Result<String> {
        let compiled = self.registry.require(resource)?;
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(resource.to_string()).or_default();

        let mut row = record.clone();
        let id = match record.get("id").and_then(as_id_string) {
            Some(id) => id,
            None => {
                let id = table.next_id;
                table.next_id += 1;
                id.to_string()
            }
        };
        row.insert("id".into(), Value::String(id.clone()));

        for (name, field) in &compiled.fields {
            if !row.contains_key(name) {
                if let Some(default) = &field.default {
                    row.insert(name.clone(), default.clone());
                }
            }
        }

        table.rows.push(row);
        Ok(id)
    }

    async fn data_put(&self, _tx: &mut dyn Transaction, resource: &str, id: &str, record: &SimpleRecord) -> Result<bool> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(resource.to_string()).or_default();
        if let Some(existing) = table.rows.iter_mut().find(|r| r.get("id").and_then(as_id_string).as_deref() == Some(id)) {
            let mut row = record.clone();
            row.insert("id".into(), Value::String(id.to_string()));
            *existing = row;
            Ok(false)
        } else {
            let mut row = record.clone();
            row.insert("id".into(), Value::String(id.to_string()));
            table.rows.push(row);
            table.next_id = table.next_id.max(id.parse::<u64>().map(|n| n + 1).unwrap_or(0));
            Ok(true)
        }
    }

    async fn data_patch(&self, _tx: &mut dyn Transaction, resource: &str, id: &str, record: &SimpleRecord) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(table) = tables.get_mut(resource) {
            if let Some(existing) = table.rows.iter_mut().find(|r| r.get("id").and_then(as_id_string).as_deref() == Some(id)) {
                for (k, v) in record {
                    existing.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }

    async fn data_delete(&self, _tx: &mut dyn Transaction, resource: &str, id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(table) = tables.get_mut(resource) {
            table.rows.retain(|r| r.get("id").and_then(as_id_string).as_deref() != Some(id));
        }
        Ok(())
    }

    async fn data_fetch_by_column_in(
        &self,
        _tx: &mut dyn Transaction,
        resource: &str,
        column: &str,
        values: &[String],
        columns: &[String],
    ) -> Result<Vec<SimpleRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(resource)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|row| row.get(column).and_then(as_id_string).map(|v| values.contains(&v)).unwrap_or(false))
                    .map(|row| project_row(row, columns))
                    .collect()
            })
            .unwrap_or_default())
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
        _order: Option<&SortTerm>,
        _limit: Option<i64>,
        _columns: &[String],
    ) -> Result<Vec<SimpleRecord>> {
        unreachable!("supports_partitioned_fetch is false; the read path never calls this")
    }
}

/// The scenario-seed registry from §8: `articles` (title/body required,
/// belongs-to `author`, many-to-many `tags` via `article_tags`), plus
/// `products` for the sparse-fieldset/computed-dependency scenario.
pub fn scenario_registry() -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();

    registry.insert(
        ResourceBuilder::new("users")
            .field(Field::new("name", FieldKind::String).required())
            .compile()
            .unwrap(),
    );

    registry.insert(
        ResourceBuilder::new("tags")
            .field(Field::new("label", FieldKind::String).required())
            .compile()
            .unwrap(),
    );

    registry.insert(
        ResourceBuilder::new("article_tags")
            .field(Field::new("article_id", FieldKind::String))
            .field(Field::new("tag_id", FieldKind::String))
            .field(Field::new("display_order", FieldKind::Integer))
            .compile()
            .unwrap(),
    );

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
            .sortable(["title"])
            .options(resource_engine_core::schema::ResourceOptions {
                include_depth_limit: Some(3),
                allows_representation_override: true,
                ..Default::default()
            })
            .compile()
            .unwrap(),
    );

    registry.insert(
        ResourceBuilder::new("products")
            .field(Field::new("name", FieldKind::String).required())
            .field(Field::new("price", FieldKind::Float).required())
            .field(Field::new("cost", FieldKind::Float).required())
            .field(
                Field::new("profit_margin", FieldKind::Float).computed(
                    vec!["price".into(), "cost".into()],
                    std::sync::Arc::new(|record: &SimpleRecord| {
                        let price = record.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
                        let cost = record.get("cost").and_then(|v| v.as_f64()).unwrap_or(0.0);
                        if price == 0.0 {
                            Value::Null
                        } else {
                            Value::from((price - cost) / price)
                        }
                    }),
                ),
            )
            .compile()
            .unwrap(),
    );

    registry.resolve().unwrap();
    registry
}

/// Coerce every field on `row` through `normalize_value`, the way a real
/// driver's rows would arrive before the Storage Executor's post-fetch
/// normalization (§4.5) — kept separate from `FakeStorage` since the seed
/// helper stores already-wire-shaped values.
pub fn normalize_seed(resource: &resource_engine_core::schema::CompiledResource, mut row: SimpleRecord) -> SimpleRecord {
    for (name, field) in &resource.fields {
        if let Some(value) = row.get(name).cloned() {
            row.insert(name.clone(), normalize_value(field.kind, value));
        }
    }
    row
}
