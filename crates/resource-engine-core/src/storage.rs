//! The Storage Executor collaborator contract (§4.5, §6): the seven
//! procedures a concrete database adapter implements, plus the
//! value-normalization rules applied to the rows it returns.
//!
//! Core never speaks SQL directly; `resource-engine-sql` supplies the
//! fragment builders a concrete backend (in `resource-engine-server`) uses
//! to satisfy this trait.

use crate::error::Result;
use crate::query_string::{PageParams, SortTerm};
use crate::schema::FieldKind;
use crate::simplified::SimpleRecord;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::any::Any;

/// A single AND-combined filter condition, already resolved to a physical
/// field and operator by the Query Planner's search-schema lookup.
#[derive(Clone, Debug)]
pub struct FilterCondition {
    pub field: String,
    pub operator: crate::schema::FilterOperator,
    pub value: String,
}

/// The fully-resolved request context handed to [`StorageBackend::data_query`]
/// (§4.4's planner output, §6's "request context").
#[derive(Clone, Debug, Default)]
pub struct QueryRequest {
    pub columns: Vec<String>,
    pub filters: Vec<FilterCondition>,
    pub sort: Vec<SortTerm>,
    pub page: PageParams,
    /// Whether to compute a total row count alongside the page of rows.
    pub count_total: bool,
}

#[derive(Clone, Debug, Default)]
pub struct QueryResultSet {
    pub rows: Vec<SimpleRecord>,
    pub total: Option<i64>,
}

/// Marker for an in-flight transaction handle. Core only ever moves this
/// around opaquely; a concrete backend downcasts via [`as_any_mut`] to reach
/// its real connection.
///
/// [`as_any_mut`]: Transaction::as_any_mut
pub trait Transaction: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// The storage collaborator contract (§6): seven data procedures, a
/// transaction lifecycle, and a capability probe, all implemented against
/// whatever the concrete backend's wire protocol looks like.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn new_transaction(&self) -> Result<Box<dyn Transaction>>;
    async fn commit(&self, tx: Box<dyn Transaction>) -> Result<()>;
    async fn rollback(&self, tx: Box<dyn Transaction>) -> Result<()>;

    /// The primary selection: filters, sort, pagination, optional count.
    async fn data_query(
        &self,
        tx: &mut dyn Transaction,
        resource: &str,
        request: &QueryRequest,
    ) -> Result<QueryResultSet>;

    /// A single row by id, with the full enriched column set.
    async fn data_get(
        &self,
        tx: &mut dyn Transaction,
        resource: &str,
        id: &str,
        columns: &[String],
    ) -> Result<Option<SimpleRecord>>;

    /// A single row by id, restricted to whatever minimal column set the
    /// Permission Gate needs for a row-level check (§4.8), fetched ahead of
    /// the full read to avoid a double round trip when access is denied.
    async fn data_get_minimal(
        &self,
        tx: &mut dyn Transaction,
        resource: &str,
        id: &str,
        columns: &[String],
    ) -> Result<Option<SimpleRecord>>;

    async fn data_exists(&self, tx: &mut dyn Transaction, resource: &str, id: &str) -> Result<bool>;

    /// Insert a new row, returning the assigned (or client-supplied) id.
    async fn data_post(&self, tx: &mut dyn Transaction, resource: &str, record: &SimpleRecord) -> Result<String>;

    /// Replace a row, or insert it if absent and the resource allows
    /// client-assigned ids (§4.6 "upsert is a legal PUT outcome"). Returns
    /// `true` when the row was newly inserted.
    async fn data_put(
        &self,
        tx: &mut dyn Transaction,
        resource: &str,
        id: &str,
        record: &SimpleRecord,
    ) -> Result<bool>;

    async fn data_patch(
        &self,
        tx: &mut dyn Transaction,
        resource: &str,
        id: &str,
        record: &SimpleRecord,
    ) -> Result<()>;

    async fn data_delete(&self, tx: &mut dyn Transaction, resource: &str, id: &str) -> Result<()>;

    /// Batched `column IN (values)` fetch, used by include expansion for
    /// belongs-to (by primary key) and direct has-many (by foreign key).
    async fn data_fetch_by_column_in(
        &self,
        tx: &mut dyn Transaction,
        resource: &str,
        column: &str,
        values: &[String],
        columns: &[String],
    ) -> Result<Vec<SimpleRecord>>;

    /// Whether this backend can satisfy a per-parent-limited/ordered
    /// has-many include with one partitioned (window-function) query
    /// instead of one query per parent (§4.5, §6's capability probe).
    fn supports_partitioned_fetch(&self) -> bool;

    /// Partitioned fetch for a per-parent-limited/ordered has-many include
    /// node. Only ever invoked when [`supports_partitioned_fetch`] is true;
    /// callers fall back to one `data_fetch_by_column_in` per parent group
    /// otherwise.
    ///
    /// [`supports_partitioned_fetch`]: StorageBackend::supports_partitioned_fetch
    async fn data_fetch_partitioned(
        &self,
        tx: &mut dyn Transaction,
        resource: &str,
        partition_column: &str,
        parent_ids: &[String],
        order: Option<&SortTerm>,
        limit: Option<i64>,
        columns: &[String],
    ) -> Result<Vec<SimpleRecord>>;
}

/// Coerce a raw database value into its wire-ready form, by declared field
/// kind (§4.5 "Post-fetch it normalizes database-typed values").
pub fn normalize_value(kind: FieldKind, raw: Value) -> Value {
    match (kind, raw) {
        (FieldKind::Boolean, Value::Number(n)) => Value::Bool(n.as_i64() == Some(1)),
        (FieldKind::Boolean, Value::String(s)) => {
            Value::Bool(s == "1" || s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("t"))
        }
        (FieldKind::DateTime, Value::String(s)) => normalize_datetime(&s),
        (FieldKind::Date, Value::String(s)) => normalize_date(&s),
        (FieldKind::Time, Value::String(s)) => Value::String(normalize_time(&s)),
        (_, other) => other,
    }
}

/// Date-times pass through as-is if already an offset form; database-local
/// naive forms are treated as UTC (§4.5).
fn normalize_datetime(raw: &str) -> Value {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Value::String(dt.with_timezone(&Utc).to_rfc3339());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Value::String(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).to_rfc3339());
        }
    }
    Value::String(raw.to_string())
}

/// Date-only strings become UTC midnight (§4.5).
fn normalize_date(raw: &str) -> Value {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Value::String(DateTime::<Utc>::from_naive_utc_and_offset(midnight, Utc).to_rfc3339());
        }
    }
    Value::String(raw.to_string())
}

/// Time-only fields are returned as plain `HH:MM:SS`, dropping any
/// fractional-second or offset suffix the driver attached.
fn normalize_time(raw: &str) -> String {
    raw.split(['.', '+']).next().unwrap_or(raw).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_boolean_from_integer() {
        assert_eq!(normalize_value(FieldKind::Boolean, Value::from(1)), Value::Bool(true));
        assert_eq!(normalize_value(FieldKind::Boolean, Value::from(0)), Value::Bool(false));
    }

    #[test]
    fn test_normalize_boolean_from_string() {
        assert_eq!(normalize_value(FieldKind::Boolean, Value::String("1".into())), Value::Bool(true));
        assert_eq!(normalize_value(FieldKind::Boolean, Value::String("0".into())), Value::Bool(false));
    }

    #[test]
    fn test_normalize_date_to_utc_midnight() {
        let normalized = normalize_value(FieldKind::Date, Value::String("2024-03-01".into()));
        assert_eq!(normalized, Value::String("2024-03-01T00:00:00+00:00".into()));
    }

    #[test]
    fn test_normalize_naive_datetime_as_utc() {
        let normalized = normalize_value(FieldKind::DateTime, Value::String("2024-03-01 08:30:00".into()));
        assert_eq!(normalized, Value::String("2024-03-01T08:30:00+00:00".into()));
    }

    #[test]
    fn test_normalize_time_strips_fractional_seconds() {
        let normalized = normalize_value(FieldKind::Time, Value::String("08:30:00.123456".into()));
        assert_eq!(normalized, Value::String("08:30:00".into()));
    }

    #[test]
    fn test_normalize_passes_through_non_coerced_kinds() {
        let normalized = normalize_value(FieldKind::String, Value::String("hello".into()));
        assert_eq!(normalized, Value::String("hello".into()));
    }
}
