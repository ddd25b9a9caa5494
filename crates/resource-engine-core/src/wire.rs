//! JSON:API 1.0 wire types — the "document form" referred to throughout this
//! crate. These are the shapes a transport collaborator serializes to and
//! deserializes from the HTTP body; the Payload Codec converts between these
//! and the simplified form used internally.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A resource identifier: `{type, id}`, used for relationship linkage.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl Identifier {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// Relationship linkage: `null`, a single identifier, or an array of them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    ToOne(Option<Identifier>),
    ToMany(Vec<Identifier>),
}

/// A single entry under `relationships`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Linkage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// All relationships keyed by alias, as they appear on the wire.
pub type RelationshipsObject = IndexMap<String, RelationshipObject>;

/// A single resource object in `data` or `included`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub attributes: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationships: Option<RelationshipsObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ResourceObject {
    /// The identifier for this object, if it has an id.
    pub fn identifier(&self) -> Option<Identifier> {
        self.id.clone().map(|id| Identifier::new(self.kind.clone(), id))
    }
}

/// `data` in a document: one resource, many resources, or a bare identifier
/// payload (used by relationship-linkage-only endpoints; not exposed by the
/// six core operations but kept since PATCH on a to-many relationship
/// endpoint uses the same shape internally).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentData {
    Single(ResourceObject),
    Many(Vec<ResourceObject>),
    Null,
}

/// A full JSON:API document, as sent or received over the wire.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DocumentData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<ResourceObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Value>,
}

impl Document {
    pub fn single(resource: ResourceObject) -> Self {
        Self {
            data: Some(DocumentData::Single(resource)),
            ..Default::default()
        }
    }

    pub fn many(resources: Vec<ResourceObject>) -> Self {
        Self {
            data: Some(DocumentData::Many(resources)),
            ..Default::default()
        }
    }

    pub fn null() -> Self {
        Self {
            data: Some(DocumentData::Null),
            ..Default::default()
        }
    }

    /// True if `data.type` is present, used by the codec to detect a
    /// document already in wire form (Payload Codec is only idempotent on
    /// inputs recognizable this way).
    pub fn looks_like_document(value: &Value) -> bool {
        value
            .get("data")
            .map(|d| d.get("type").is_some() || d.is_array() || d.is_null())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_roundtrip() {
        let id = Identifier::new("articles", "1");
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(json["type"], "articles");
        assert_eq!(json["id"], "1");
    }

    #[test]
    fn test_document_single_serializes_object_not_array() {
        let doc = Document::single(ResourceObject {
            kind: "articles".into(),
            id: Some("1".into()),
            ..Default::default()
        });
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["data"].is_object());
    }

    #[test]
    fn test_looks_like_document() {
        let wire = serde_json::json!({"data": {"type": "articles", "attributes": {}}});
        assert!(Document::looks_like_document(&wire));

        let simplified = serde_json::json!({"title": "hello"});
        assert!(!Document::looks_like_document(&simplified));
    }
}
