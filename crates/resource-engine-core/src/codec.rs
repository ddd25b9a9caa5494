//! The Payload Codec (§4.2): pure, bidirectional conversion between the
//! simplified flat form and the JSON:API document form.

use crate::error::{Error, Result};
use crate::schema::{CompiledResource, Relationship, ResourceRegistry};
use crate::simplified::{read_to_many_ids, read_to_one_id, PolymorphicRef, SimpleRecord};
use crate::wire::{Document, DocumentData, Identifier, Linkage, RelationshipObject, ResourceObject};
use indexmap::IndexMap;
use serde_json::Value;

/// Converts simplified records to JSON:API resource/document shapes and
/// back. Carries no state; every method is a pure function of its inputs.
pub struct Codec;

impl Codec {
    /// simplified → document, for a single record.
    pub fn encode_record(record: &SimpleRecord, resource: &CompiledResource) -> ResourceObject {
        let mut attributes = IndexMap::new();
        let mut relationships = IndexMap::new();

        for (key, value) in record {
            if key == &resource.id_field {
                continue;
            }
            if let Some(relationship) = resource.relationship(key) {
                relationships.insert(key.clone(), Self::encode_relationship_value(relationship, value));
            } else {
                attributes.insert(key.clone(), value.clone());
            }
        }

        let id = record
            .get(&resource.id_field)
            .and_then(|v| v.as_str().map(|s| s.to_string()).or_else(|| v.as_i64().map(|n| n.to_string())));

        ResourceObject {
            kind: resource.name.clone(),
            id,
            attributes,
            relationships: if relationships.is_empty() { None } else { Some(relationships) },
            meta: None,
        }
    }

    fn encode_relationship_value(relationship: &Relationship, value: &Value) -> RelationshipObject {
        if relationship.is_to_many() {
            let target = relationship.target().unwrap_or_default();
            let ids = value
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(|s| Identifier::new(target, s)))
                        .collect()
                })
                .unwrap_or_default();
            return RelationshipObject {
                data: Some(Linkage::ToMany(ids)),
                links: None,
                meta: None,
            };
        }

        if relationship.is_polymorphic() {
            let identifier = if value.is_null() {
                None
            } else {
                PolymorphicRef::from_value(value).map(|p| Identifier::new(p.resource_type, p.id))
            };
            return RelationshipObject {
                data: Some(Linkage::ToOne(identifier)),
                links: None,
                meta: None,
            };
        }

        let target = relationship.target().unwrap_or_default();
        let identifier = value.as_str().map(|id| Identifier::new(target, id));
        RelationshipObject {
            data: Some(Linkage::ToOne(identifier)),
            links: None,
            meta: None,
        }
    }

    /// simplified → document, for a collection, with `included` carried at
    /// the top level (§4.2 "Array responses preserve meta and links").
    pub fn encode_collection(
        records: &[SimpleRecord],
        resource: &CompiledResource,
        included: Vec<ResourceObject>,
        meta: Option<Value>,
    ) -> Document {
        let data = records.iter().map(|r| Self::encode_record(r, resource)).collect();
        Document {
            data: Some(DocumentData::Many(data)),
            included,
            meta,
            links: None,
        }
    }

    /// document → simplified, for a single resource object.
    ///
    /// `registry` resolves relationship targets for validation and
    /// polymorphic type tagging; `included` is consulted to recursively
    /// inline related records, each inlined copy itself simplified
    /// (§4.2 "reverse direction").
    pub fn decode_record(
        object: &ResourceObject,
        resource: &CompiledResource,
        registry: &ResourceRegistry,
        included: &[ResourceObject],
    ) -> Result<SimpleRecord> {
        if object.kind != resource.name {
            return Err(Error::PayloadShape(format!(
                "expected data.type '{}', got '{}'",
                resource.name, object.kind
            )));
        }

        let mut record = SimpleRecord::new();
        if let Some(id) = &object.id {
            record.insert(resource.id_field.clone(), Value::String(id.clone()));
        }

        for (key, value) in &object.attributes {
            record.insert(key.clone(), value.clone());
        }

        if let Some(relationships) = &object.relationships {
            for (alias, rel_object) in relationships {
                let relationship = resource.relationship(alias).ok_or_else(|| {
                    Error::PayloadShape(format!("unknown relationship '{}' on resource '{}'", alias, resource.name))
                })?;
                let value = Self::decode_relationship_value(relationship, rel_object)?;
                record.insert(alias.clone(), value);

                if let Some(inlined) = Self::inline_related(relationship, rel_object, registry, included)? {
                    record.insert(format!("{}__included", alias), inlined);
                }
            }
        }

        Ok(record)
    }

    fn decode_relationship_value(relationship: &Relationship, rel_object: &RelationshipObject) -> Result<Value> {
        match &rel_object.data {
            None => Ok(Value::Null),
            Some(Linkage::ToMany(ids)) => {
                if relationship.is_to_one() {
                    return Err(Error::PayloadShape(format!(
                        "relationship '{}' expects to-one linkage, got an array",
                        relationship.alias()
                    )));
                }
                Ok(Value::Array(ids.iter().map(|i| Value::String(i.id.clone())).collect()))
            }
            Some(Linkage::ToOne(None)) => Ok(Value::Null),
            Some(Linkage::ToOne(Some(identifier))) => {
                if relationship.is_polymorphic() {
                    Ok(PolymorphicRef {
                        id: identifier.id.clone(),
                        resource_type: identifier.kind.clone(),
                    }
                    .to_value())
                } else {
                    Ok(Value::String(identifier.id.clone()))
                }
            }
        }
    }

    fn inline_related(
        relationship: &Relationship,
        rel_object: &RelationshipObject,
        registry: &ResourceRegistry,
        included: &[ResourceObject],
    ) -> Result<Option<Value>> {
        let identifiers: Vec<Identifier> = match &rel_object.data {
            Some(Linkage::ToOne(Some(id))) => vec![id.clone()],
            Some(Linkage::ToMany(ids)) => ids.clone(),
            _ => return Ok(None),
        };

        let mut inlined = Vec::new();
        for identifier in &identifiers {
            if let Some(found) = included.iter().find(|o| o.id.as_deref() == Some(&identifier.id) && o.kind == identifier.kind) {
                let target_resource = registry.require(&identifier.kind)?;
                let simplified = Self::decode_record(found, target_resource, registry, included)?;
                inlined.push(Value::Object(serde_json::Map::from_iter(
                    simplified.into_iter().map(|(k, v)| (k, v)),
                )));
            }
        }

        if inlined.is_empty() {
            return Ok(None);
        }

        if relationship.is_to_one() {
            Ok(inlined.into_iter().next())
        } else {
            Ok(Some(Value::Array(inlined)))
        }
    }

    /// document → simplified for an entire document (single or many),
    /// enforcing §3 invariant 5 ("included is forbidden in write payloads")
    /// when `is_write` is set.
    pub fn decode_document(
        document: &Document,
        resource: &CompiledResource,
        registry: &ResourceRegistry,
        is_write: bool,
    ) -> Result<Vec<SimpleRecord>> {
        if is_write && !document.included.is_empty() {
            return Err(Error::PayloadShape("included is not permitted in write payloads".into()));
        }

        match &document.data {
            None | Some(DocumentData::Null) => Ok(vec![]),
            Some(DocumentData::Single(object)) => {
                Ok(vec![Self::decode_record(object, resource, registry, &document.included)?])
            }
            Some(DocumentData::Many(objects)) => objects
                .iter()
                .map(|o| Self::decode_record(o, resource, registry, &document.included))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::field::{Field, FieldKind};
    use crate::schema::relationship::Relationship;
    use crate::schema::resource::ResourceBuilder;

    fn articles_resource() -> CompiledResource {
        ResourceBuilder::new("articles")
            .field(Field::new("title", FieldKind::String))
            .field(Field::new("author_id", FieldKind::String))
            .relationship(Relationship::BelongsTo {
                alias: "author".into(),
                foreign_key: "author_id".into(),
                target: "users".into(),
            })
            .relationship(Relationship::HasManyThrough {
                alias: "tags".into(),
                target: "tags".into(),
                pivot: "article_tags".into(),
                foreign_key: "article_id".into(),
                other_key: "tag_id".into(),
                skip_existence_check: false,
            })
            .compile()
            .unwrap()
    }

    #[test]
    fn test_encode_record_moves_belongs_to_into_relationships() {
        let resource = articles_resource();
        let mut record = SimpleRecord::new();
        record.insert("id".into(), Value::String("1".into()));
        record.insert("title".into(), Value::String("hello".into()));
        record.insert("author".into(), Value::String("7".into()));
        record.insert("tags".into(), serde_json::json!(["3", "4"]));

        let object = Codec::encode_record(&record, &resource);
        assert_eq!(object.id, Some("1".into()));
        assert!(!object.attributes.contains_key("author"));
        assert_eq!(object.attributes["title"], Value::String("hello".into()));

        let relationships = object.relationships.unwrap();
        match &relationships["author"].data {
            Some(Linkage::ToOne(Some(id))) => {
                assert_eq!(id.kind, "users");
                assert_eq!(id.id, "7");
            }
            other => panic!("unexpected: {:?}", other),
        }
        match &relationships["tags"].data {
            Some(Linkage::ToMany(ids)) => assert_eq!(ids.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_record_rejects_type_mismatch() {
        let resource = articles_resource();
        let registry = ResourceRegistry::new();
        let object = ResourceObject {
            kind: "users".into(),
            id: Some("1".into()),
            ..Default::default()
        };
        assert!(Codec::decode_record(&object, &resource, &registry, &[]).is_err());
    }

    #[test]
    fn test_decode_document_rejects_included_on_write() {
        let resource = articles_resource();
        let registry = ResourceRegistry::new();
        let document = Document {
            data: Some(DocumentData::Single(ResourceObject {
                kind: "articles".into(),
                id: Some("1".into()),
                ..Default::default()
            })),
            included: vec![ResourceObject::default()],
            ..Default::default()
        };

        assert!(Codec::decode_document(&document, &resource, &registry, true).is_err());
        assert!(Codec::decode_document(&document, &resource, &registry, false).is_ok());
    }

    #[test]
    fn test_decode_relationship_rejects_array_for_to_one() {
        let resource = articles_resource();
        let relationship = resource.relationship("author").unwrap();
        let rel_object = RelationshipObject {
            data: Some(Linkage::ToMany(vec![Identifier::new("users", "1")])),
            links: None,
            meta: None,
        };
        assert!(Codec::decode_relationship_value(relationship, &rel_object).is_err());
    }
}
