//! Declarative resource registration (§4.1 "Schema Compiler" / §3
//! "Lifecycle": "a resource definition is created once at startup through
//! registration, validated, compiled, and cached").
//!
//! This replaces the donor's `SchemaCache::load()` database introspection:
//! instead of discovering tables and foreign keys by querying
//! `information_schema` at boot, every resource this server exposes is
//! declared here once, in Rust, and compiled by `ResourceBuilder::compile`.
//! A real deployment would move each resource's declaration next to the
//! domain module that owns it; they're kept together here since this binary
//! has no other natural per-resource home yet.

use resource_engine_core::schema::{Field, FieldKind, FilterOperator, ResourceBuilder, ResourceOptions, ResourceRegistry};
use resource_engine_core::Relationship;
use resource_engine_core::simplified::SimpleRecord;
use serde_json::Value;
use std::sync::Arc;

/// Build and validate the registry this server exposes over HTTP. Exercises
/// every relationship kind from §3: belongs-to, direct has-many, many-to-many
/// through a pivot, and both directions of a polymorphic relationship.
pub fn build_registry() -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();

    registry.insert(
        ResourceBuilder::new("companies")
            .field(Field::new("name", FieldKind::String).required())
            .relationship(Relationship::HasMany {
                alias: "employees".into(),
                target: "users".into(),
                foreign_key: "company_id".into(),
            })
            .sortable(["name"])
            .compile()
            .expect("companies resource definition is well-formed"),
    );

    registry.insert(
        ResourceBuilder::new("users")
            .field(Field::new("name", FieldKind::String).required())
            .field(Field::new("email", FieldKind::String).required().searchable(FilterOperator::Eq))
            .field(Field::new("password_hash", FieldKind::String).always_hidden())
            .field(Field::new("company_id", FieldKind::Uuid))
            .field(Field::new("manager_id", FieldKind::Uuid))
            .relationship(Relationship::BelongsTo {
                alias: "company".into(),
                foreign_key: "company_id".into(),
                target: "companies".into(),
            })
            .relationship(Relationship::BelongsTo {
                alias: "manager".into(),
                foreign_key: "manager_id".into(),
                target: "users".into(),
            })
            .relationship(Relationship::HasMany {
                alias: "articles".into(),
                target: "articles".into(),
                foreign_key: "author_id".into(),
            })
            .sortable(["name", "email"])
            .compile()
            .expect("users resource definition is well-formed"),
    );

    registry.insert(
        ResourceBuilder::new("tags")
            .field(Field::new("label", FieldKind::String).required().searchable(FilterOperator::ILike))
            .sortable(["label"])
            .compile()
            .expect("tags resource definition is well-formed"),
    );

    // The `article_tags` pivot: a first-class resource in its own right
    // (§3 "Pivot resource"), but the Write Coordinator is the only caller
    // that ever touches it directly — its rows are synchronized, never
    // created or deleted through its own `/article_tags` route by a client.
    registry.insert(
        ResourceBuilder::new("article_tags")
            .field(Field::new("article_id", FieldKind::Uuid).required())
            .field(Field::new("tag_id", FieldKind::Uuid).required())
            .field(Field::new("display_order", FieldKind::Integer))
            .compile()
            .expect("article_tags resource definition is well-formed"),
    );

    registry.insert(
        ResourceBuilder::new("photos")
            .field(Field::new("caption", FieldKind::String))
            .field(Field::new("url", FieldKind::String).required())
            .compile()
            .expect("photos resource definition is well-formed"),
    );

    registry.insert(
        ResourceBuilder::new("comments")
            .field(Field::new("body", FieldKind::String).required())
            .field(Field::new("commentable_type", FieldKind::String).required())
            .field(Field::new("commentable_id", FieldKind::Uuid).required())
            .relationship(Relationship::BelongsToPolymorphic {
                alias: "commentable".into(),
                type_field: "commentable_type".into(),
                id_field: "commentable_id".into(),
                targets: vec!["articles".into(), "photos".into()],
            })
            .compile()
            .expect("comments resource definition is well-formed"),
    );

    registry.insert(
        ResourceBuilder::new("articles")
            .field(Field::new("title", FieldKind::String).required().searchable(FilterOperator::ILike))
            .field(Field::new("body", FieldKind::String).required())
            .field(Field::new("author_id", FieldKind::Uuid))
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
            .relationship(Relationship::HasManyViaPolymorphic {
                alias: "comments".into(),
                target: "comments".into(),
                type_field: "commentable_type".into(),
                id_field: "commentable_id".into(),
                owner_type_value: "articles".into(),
            })
            .sortable(["title"])
            .options(ResourceOptions {
                include_depth_limit: Some(3),
                allows_representation_override: true,
                ..Default::default()
            })
            .compile()
            .expect("articles resource definition is well-formed"),
    );

    registry.insert(
        ResourceBuilder::new("products")
            .field(Field::new("name", FieldKind::String).required().searchable(FilterOperator::ILike))
            .field(Field::new("category", FieldKind::String).searchable(FilterOperator::Eq))
            .field(Field::new("price", FieldKind::Float).required())
            .field(Field::new("cost", FieldKind::Float).required())
            .field(Field::new("internal_notes", FieldKind::String).always_hidden())
            .field(
                Field::new("profit_margin", FieldKind::Float).computed(
                    vec!["price".into(), "cost".into()],
                    Arc::new(|record: &SimpleRecord| {
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
            .sortable(["name", "price"])
            .compile()
            .expect("products resource definition is well-formed"),
    );

    registry.resolve().expect("every relationship target and polymorphic allow-list entry is a registered resource");
    registry
}
