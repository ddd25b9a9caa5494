//! End-to-end tests for the §8 scenario seeds, driven through the real
//! Validator -> Query Planner -> Permission Gate -> Storage Executor /
//! Write Coordinator -> Payload Codec pipeline against an in-memory
//! `FakeStorage`, with no live database involved.

use pretty_assertions::assert_eq;
use resource_engine_core::gate::{AllowAll, AuthContext};
use resource_engine_core::hooks::HookRegistry;
use resource_engine_core::query_string::{parse_query_string, ParsedQuery};
use resource_engine_core::read::{self, ReadContext};
use resource_engine_core::wire::{Document, DocumentData, Identifier, Linkage, RelationshipObject, ResourceObject};
use resource_engine_core::write::{self, ReturnMode, WriteContext, WriteOutcome};
use resource_engine_core::{Error, Tiered};
use resource_engine_tests::{scenario_registry, FakeStorage};
use std::collections::HashMap;

fn read_ctx<'a>(registry: &'a resource_engine_core::ResourceRegistry, storage: &'a FakeStorage, gate: &'a AllowAll, hooks: &'a HookRegistry, auth: &'a AuthContext) -> ReadContext<'a> {
    ReadContext {
        registry,
        storage,
        gate,
        hooks,
        auth,
        default_page_size: Tiered::new(20),
        max_page_size: Tiered::new(100),
    }
}

fn write_ctx<'a>(registry: &'a resource_engine_core::ResourceRegistry, storage: &'a FakeStorage, gate: &'a AllowAll, hooks: &'a HookRegistry, auth: &'a AuthContext) -> WriteContext<'a> {
    WriteContext {
        registry,
        storage,
        gate,
        hooks,
        auth,
        default_page_size: Tiered::new(20),
        max_page_size: Tiered::new(100),
        strict_foreign_keys: true,
    }
}

fn article_object(id: Option<&str>, title: Option<&str>, body: Option<&str>, author: Option<&str>, tags: Option<Vec<&str>>) -> ResourceObject {
    let mut attributes = indexmap::IndexMap::new();
    if let Some(title) = title {
        attributes.insert("title".to_string(), serde_json::Value::String(title.to_string()));
    }
    if let Some(body) = body {
        attributes.insert("body".to_string(), serde_json::Value::String(body.to_string()));
    }

    let mut relationships = indexmap::IndexMap::new();
    if let Some(author) = author {
        relationships.insert(
            "author".to_string(),
            RelationshipObject { data: Some(Linkage::ToOne(Some(Identifier::new("users", author)))), links: None, meta: None },
        );
    }
    if let Some(tags) = tags {
        relationships.insert(
            "tags".to_string(),
            RelationshipObject {
                data: Some(Linkage::ToMany(tags.into_iter().map(|t| Identifier::new("tags", t)).collect())),
                links: None,
                meta: None,
            },
        );
    }

    ResourceObject {
        kind: "articles".into(),
        id: id.map(|s| s.to_string()),
        attributes,
        relationships: if relationships.is_empty() { None } else { Some(relationships) },
        meta: None,
    }
}

fn seed_users(storage: &FakeStorage) {
    let mut row = resource_engine_core::SimpleRecord::new();
    row.insert("id".into(), serde_json::json!("1"));
    row.insert("name".into(), serde_json::json!("Ada"));
    storage.seed("users", row);
}

fn seed_tags(storage: &FakeStorage) {
    for (id, label) in [("1", "rust"), ("2", "web"), ("3", "db"), ("4", "async")] {
        let mut row = resource_engine_core::SimpleRecord::new();
        row.insert("id".into(), serde_json::json!(id));
        row.insert("label".into(), serde_json::json!(label));
        storage.seed("tags", row);
    }
}

/// Scenario 1: create minimal, missing required `body` -> 422 with a
/// `required` violation pointing at `data.attributes.body`.
#[tokio::test]
async fn scenario_create_missing_required_field() {
    let registry = scenario_registry();
    let storage = FakeStorage::new(scenario_registry());
    seed_users(&storage);

    let gate = AllowAll;
    let hooks = HookRegistry::new();
    let auth = AuthContext::anonymous();
    let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);

    let object = article_object(None, Some("t"), None, None, None);
    let document = Document::single(object);

    let mut tx = storage.new_transaction().await.unwrap();
    let err = write::create(&ctx, tx.as_mut(), "articles", &document, None).await.unwrap_err();

    match err {
        Error::Validation(violations) => {
            assert!(violations.iter().any(|v| v.pointer == "/data/attributes/body" && v.rule == "required"), "{:?}", violations);
        }
        other => panic!("expected Validation, got {:?}", other),
    }
}

/// Scenario 2: create with a belongs-to relationship -> 201, response
/// carries `relationships.author.data = {type: "users", id: "1"}` and no
/// bare `author_id` attribute.
#[tokio::test]
async fn scenario_create_with_relationship() {
    let registry = scenario_registry();
    let storage = FakeStorage::new(scenario_registry());
    seed_users(&storage);

    let gate = AllowAll;
    let hooks = HookRegistry::new();
    let auth = AuthContext::anonymous();
    let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);

    let object = article_object(None, Some("t"), Some("b"), Some("1"), None);
    let document = Document::single(object);

    let mut tx = storage.new_transaction().await.unwrap();
    let outcome = write::create(&ctx, tx.as_mut(), "articles", &document, None).await.unwrap();

    let WriteOutcome::Document(doc) = outcome else { panic!("expected a full document") };
    let DocumentData::Single(resource) = doc.data.unwrap() else { panic!("expected single resource") };

    assert!(!resource.attributes.contains_key("author_id"));
    assert!(!resource.attributes.contains_key("author"));

    let relationships = resource.relationships.unwrap();
    match &relationships["author"].data {
        Some(Linkage::ToOne(Some(id))) => {
            assert_eq!(id.kind, "users");
            assert_eq!(id.id, "1");
        }
        other => panic!("unexpected linkage: {:?}", other),
    }
}

/// Scenario 3: sparse fieldset + computed-dependency stripping. Requesting
/// `fields[products]=name,profit_margin` must return exactly `{name,
/// profit_margin}`; `price`/`cost` (pulled in only to compute the margin)
/// are stripped.
#[tokio::test]
async fn scenario_sparse_fieldset_strips_computed_dependencies() {
    let registry = scenario_registry();
    let storage = FakeStorage::new(scenario_registry());

    let mut row = resource_engine_core::SimpleRecord::new();
    row.insert("id".into(), serde_json::json!("1"));
    row.insert("name".into(), serde_json::json!("Widget"));
    row.insert("price".into(), serde_json::json!(100.0));
    row.insert("cost".into(), serde_json::json!(60.0));
    storage.seed("products", row);

    let gate = AllowAll;
    let hooks = HookRegistry::new();
    let auth = AuthContext::anonymous();
    let ctx = read_ctx(&registry, &storage, &gate, &hooks, &auth);

    let parsed = parse_query_string("fields%5Bproducts%5D=name%2Cprofit_margin");
    let mut tx = storage.new_transaction().await.unwrap();
    let document = read::read_one(&ctx, tx.as_mut(), "products", "1", &parsed).await.unwrap().unwrap();

    let DocumentData::Single(resource) = document.data.unwrap() else { panic!("expected single resource") };
    let keys: std::collections::HashSet<&str> = resource.attributes.keys().map(|s| s.as_str()).collect();
    assert_eq!(keys, std::collections::HashSet::from(["name", "profit_margin"]));
    assert_eq!(resource.attributes["profit_margin"], serde_json::json!(0.4));
}

/// Scenario 4: include depth exceeded -> 422 `max_depth`, checked before any
/// relationship in the path needs to exist.
#[tokio::test]
async fn scenario_include_depth_exceeded() {
    let registry = scenario_registry();
    let storage = FakeStorage::new(scenario_registry());

    let mut row = resource_engine_core::SimpleRecord::new();
    row.insert("id".into(), serde_json::json!("1"));
    row.insert("title".into(), serde_json::json!("hello"));
    row.insert("body".into(), serde_json::json!("world"));
    storage.seed("articles", row);

    let gate = AllowAll;
    let hooks = HookRegistry::new();
    let auth = AuthContext::anonymous();
    let ctx = read_ctx(&registry, &storage, &gate, &hooks, &auth);

    let parsed = parse_query_string("include=author.company.employees.manager");
    let mut tx = storage.new_transaction().await.unwrap();
    let err = read::read_one(&ctx, tx.as_mut(), "articles", "1", &parsed).await.unwrap_err();

    match err {
        Error::Validation(violations) => {
            assert!(violations.iter().any(|v| v.rule == "max_depth"), "{:?}", violations);
        }
        other => panic!("expected Validation, got {:?}", other),
    }
}

/// Scenario 5: PATCH preserves untouched attributes and relationships.
#[tokio::test]
async fn scenario_patch_preserves_untouched() {
    let registry = scenario_registry();
    let storage = FakeStorage::new(scenario_registry());
    seed_users(&storage);
    seed_tags(&storage);

    let mut article = resource_engine_core::SimpleRecord::new();
    article.insert("id".into(), serde_json::json!("7"));
    article.insert("title".into(), serde_json::json!("A"));
    article.insert("body".into(), serde_json::json!("B"));
    article.insert("author_id".into(), serde_json::json!("1"));
    storage.seed("articles", article);

    for (pivot_id, other) in [("101", "1"), ("102", "2")] {
        let mut pivot = resource_engine_core::SimpleRecord::new();
        pivot.insert("id".into(), serde_json::json!(pivot_id));
        pivot.insert("article_id".into(), serde_json::json!("7"));
        pivot.insert("tag_id".into(), serde_json::json!(other));
        storage.seed("article_tags", pivot);
    }

    let gate = AllowAll;
    let hooks = HookRegistry::new();
    let auth = AuthContext::anonymous();
    let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);

    let object = article_object(Some("7"), Some("C"), None, None, None);
    let document = Document::single(object);

    let mut tx = storage.new_transaction().await.unwrap();
    write::update(&ctx, tx.as_mut(), "articles", "7", &document, Some(ReturnMode::None)).await.unwrap();

    let read = read_ctx(&registry, &storage, &gate, &hooks, &auth);
    let reread = read::read_one(&read, tx.as_mut(), "articles", "7", &ParsedQuery::default()).await.unwrap().unwrap();
    let DocumentData::Single(resource) = reread.data.unwrap() else { panic!("expected single") };

    assert_eq!(resource.attributes["title"], serde_json::json!("C"));
    assert_eq!(resource.attributes["body"], serde_json::json!("B"));

    let tags = storage.snapshot("article_tags");
    let mut tag_ids: Vec<String> = tags.iter().filter_map(|r| r.get("tag_id").and_then(|v| v.as_str()).map(|s| s.to_string())).collect();
    tag_ids.sort();
    assert_eq!(tag_ids, vec!["1".to_string(), "2".to_string()]);
}

/// Scenario 6: preserving many-to-many sync. PUT tags `[1,2,3]` -> `[2,3,4]`
/// leaves (9,2)/(9,3)'s pivot rows (and their `display_order`) untouched,
/// deletes (9,1), inserts (9,4).
#[tokio::test]
async fn scenario_many_to_many_preserving_sync() {
    let registry = scenario_registry();
    let storage = FakeStorage::new(scenario_registry());
    seed_tags(&storage);

    let mut article = resource_engine_core::SimpleRecord::new();
    article.insert("id".into(), serde_json::json!("9"));
    article.insert("title".into(), serde_json::json!("T"));
    article.insert("body".into(), serde_json::json!("B"));
    storage.seed("articles", article);

    let seed_pivots = [("201", "1", 0), ("202", "2", 1), ("203", "3", 2)];
    for (pivot_id, tag_id, order) in seed_pivots {
        let mut pivot = resource_engine_core::SimpleRecord::new();
        pivot.insert("id".into(), serde_json::json!(pivot_id));
        pivot.insert("article_id".into(), serde_json::json!("9"));
        pivot.insert("tag_id".into(), serde_json::json!(tag_id));
        pivot.insert("display_order".into(), serde_json::json!(order));
        storage.seed("article_tags", pivot);
    }

    let gate = AllowAll;
    let hooks = HookRegistry::new();
    let auth = AuthContext::anonymous();
    let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);

    let object = article_object(Some("9"), None, None, None, Some(vec!["2", "3", "4"]));
    let document = Document::single(object);

    let mut tx = storage.new_transaction().await.unwrap();
    write::update(&ctx, tx.as_mut(), "articles", "9", &document, Some(ReturnMode::None)).await.unwrap();

    let pivots = storage.snapshot("article_tags");
    let by_tag: HashMap<String, &resource_engine_core::SimpleRecord> =
        pivots.iter().map(|r| (r.get("tag_id").and_then(|v| v.as_str()).unwrap().to_string(), r)).collect();

    assert!(!by_tag.contains_key("1"), "tag 1's pivot row should have been deleted");
    assert!(by_tag.contains_key("4"), "tag 4's pivot row should have been inserted");

    let kept_2 = by_tag["2"];
    assert_eq!(kept_2.get("id").and_then(|v| v.as_str()), Some("202"));
    assert_eq!(kept_2.get("display_order"), Some(&serde_json::json!(1)));

    let kept_3 = by_tag["3"];
    assert_eq!(kept_3.get("id").and_then(|v| v.as_str()), Some("203"));
    assert_eq!(kept_3.get("display_order"), Some(&serde_json::json!(2)));
}

/// Testable Property 5: PUT with a `relationships` object nulls/clears any
/// relationship the schema declares but the payload doesn't mention; PUT
/// without a `relationships` key at all leaves relationships untouched
/// (§9 Open Question 1).
#[tokio::test]
async fn put_relationships_object_asymmetry() {
    let registry = scenario_registry();
    let storage = FakeStorage::new(scenario_registry());
    seed_users(&storage);

    let mut article = resource_engine_core::SimpleRecord::new();
    article.insert("id".into(), serde_json::json!("5"));
    article.insert("title".into(), serde_json::json!("T"));
    article.insert("body".into(), serde_json::json!("B"));
    article.insert("author_id".into(), serde_json::json!("1"));
    storage.seed("articles", article);

    let gate = AllowAll;
    let hooks = HookRegistry::new();
    let auth = AuthContext::anonymous();
    let ctx = write_ctx(&registry, &storage, &gate, &hooks, &auth);

    // PUT with no `relationships` key at all: author must survive.
    let object = article_object(Some("5"), Some("T2"), Some("B2"), None, None);
    let document = Document::single(object);
    let mut tx = storage.new_transaction().await.unwrap();
    write::replace(&ctx, tx.as_mut(), "articles", "5", &document, Some(ReturnMode::None)).await.unwrap();

    let row = storage.snapshot("articles").into_iter().find(|r| r.get("id").and_then(|v| v.as_str()) == Some("5")).unwrap();
    assert_eq!(row.get("author_id").and_then(|v| v.as_str()), Some("1"));

    // PUT with an explicit empty `relationships` object: author must be nulled.
    let mut object = article_object(Some("5"), Some("T3"), Some("B3"), None, None);
    object.relationships = Some(indexmap::IndexMap::new());
    let document = Document::single(object);
    write::replace(&ctx, tx.as_mut(), "articles", "5", &document, Some(ReturnMode::None)).await.unwrap();

    let row = storage.snapshot("articles").into_iter().find(|r| r.get("id").and_then(|v| v.as_str()) == Some("5")).unwrap();
    assert!(row.get("author_id").map(|v| v.is_null()).unwrap_or(true));
}

/// Testable Property 2: an always-hidden field is never serialized, even
/// when explicitly requested via a sparse fieldset.
#[tokio::test]
async fn always_hidden_field_never_serialized() {
    let mut registry = resource_engine_core::ResourceRegistry::new();
    registry.insert(
        resource_engine_core::ResourceBuilder::new("accounts")
            .field(resource_engine_core::Field::new("email", resource_engine_core::FieldKind::String))
            .field(resource_engine_core::Field::new("password_hash", resource_engine_core::FieldKind::String).always_hidden())
            .compile()
            .unwrap(),
    );

    let storage = FakeStorage::new({
        let mut r = resource_engine_core::ResourceRegistry::new();
        r.insert(resource_engine_core::ResourceBuilder::new("accounts").compile().unwrap());
        r
    });
    let mut row = resource_engine_core::SimpleRecord::new();
    row.insert("id".into(), serde_json::json!("1"));
    row.insert("email".into(), serde_json::json!("a@example.com"));
    row.insert("password_hash".into(), serde_json::json!("secret"));
    storage.seed("accounts", row);

    let gate = AllowAll;
    let hooks = HookRegistry::new();
    let auth = AuthContext::anonymous();
    let ctx = read_ctx(&registry, &storage, &gate, &hooks, &auth);

    let parsed = parse_query_string("fields%5Baccounts%5D=email%2Cpassword_hash");
    let mut tx = storage.new_transaction().await.unwrap();
    let document = read::read_one(&ctx, tx.as_mut(), "accounts", "1", &parsed).await.unwrap().unwrap();

    let DocumentData::Single(resource) = document.data.unwrap() else { panic!("expected single") };
    assert!(!resource.attributes.contains_key("password_hash"));
}
