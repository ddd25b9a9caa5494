//! The "simplified" (flat, programmatic) record form.
//!
//! A simplified record is a plain key/value map: attributes sit at the top
//! level alongside relationship keys. A belongs-to relationship appears
//! under its alias holding the related id (`Value::String` or `Value::Null`
//! or, when polymorphic, `{"id": ..., "_type": ...}`); a to-many
//! relationship appears under the relationship name as an array of ids.

use indexmap::IndexMap;
use serde_json::Value;

/// The key used for the polymorphic type discriminator inside a simplified
/// belongs-to value, e.g. `{"id": "7", "_type": "users"}`.
pub const POLYMORPHIC_TYPE_KEY: &str = "_type";

/// A single simplified record.
pub type SimpleRecord = IndexMap<String, Value>;

/// A polymorphic reference, as carried in a simplified record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolymorphicRef {
    pub id: String,
    pub resource_type: String,
}

impl PolymorphicRef {
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "id": self.id, POLYMORPHIC_TYPE_KEY: self.resource_type })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = obj.get("id")?.as_str()?.to_string();
        let resource_type = obj.get(POLYMORPHIC_TYPE_KEY)?.as_str()?.to_string();
        Some(Self { id, resource_type })
    }
}

/// Read a to-one relationship value (a bare id, or null) from a simplified
/// record key.
pub fn read_to_one_id(record: &SimpleRecord, key: &str) -> Option<Option<String>> {
    match record.get(key) {
        None => None,
        Some(Value::Null) => Some(None),
        Some(Value::String(s)) => Some(Some(s.clone())),
        Some(other) => Some(other.as_str().map(|s| s.to_string())),
    }
}

/// Read a to-many relationship value (an array of ids) from a simplified
/// record key.
pub fn read_to_many_ids(record: &SimpleRecord, key: &str) -> Option<Vec<String>> {
    record.get(key).and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()).or_else(|| v.as_i64().map(|n| n.to_string())))
            .collect()
    })
}
