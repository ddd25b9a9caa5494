//! The Query Planner (§4.4): turns a validated, parsed request into the
//! column selection, filter conditions, sort/page parameters, and include
//! tree the Storage Executor consumes.
//!
//! The Validator runs first and rejects unknown fields, non-sortable
//! columns, and out-of-range pagination; the planner below still guards
//! defensively against the cases the Validator doesn't cover (sparse
//! fieldset unknown-field detection happens here, since it needs the
//! resource's field table rather than just its sortable/search whitelists).

pub mod include_tree;

pub use include_tree::{build_include_tree, IncludeNode};

use crate::config::Tiered;
use crate::error::{Error, Result};
use crate::query_string::{PageParams, ParsedQuery, SortTerm};
use crate::schema::field::Visibility;
use crate::schema::{CompiledResource, ResourceRegistry};
use crate::storage::{FilterCondition, QueryRequest};
use indexmap::IndexSet;
use std::collections::HashSet;

/// The resolved column-selection outcome of §4.4's five-step algorithm.
#[derive(Clone, Debug, Default)]
pub struct FieldSelectionPlan {
    /// Physical columns to select, in a stable order.
    pub columns: Vec<String>,
    /// Computed field names to evaluate once rows are loaded.
    pub computed_fields: Vec<String>,
    /// Columns pulled in only to satisfy a computed field's dependencies;
    /// stripped from the response unless also explicitly requested.
    pub auxiliary_columns: HashSet<String>,
}

/// Resolve the set of columns to fetch (§4.4 "Field selection", steps 1-5).
pub fn select_fields(resource: &CompiledResource, requested: Option<&[String]>) -> Result<FieldSelectionPlan> {
    let mut columns: IndexSet<String> = IndexSet::new();
    let mut computed_fields = Vec::new();

    // Step 1: id column always selected.
    columns.insert(resource.id_field.clone());

    match requested {
        Some(names) => {
            // Step 2: sparse fieldset.
            for name in names {
                if name == &resource.id_field {
                    continue;
                }
                let field = resource.field(name).ok_or_else(|| {
                    Error::validation(format!("/fields/{}/{}", resource.name, name), "unknown_field")
                })?;
                if matches!(field.visibility, Visibility::AlwaysHidden) {
                    continue;
                }
                if field.is_computed() {
                    computed_fields.push(name.clone());
                    continue;
                }
                if field.virtual_field {
                    continue;
                }
                columns.insert(name.clone());
            }
        }
        None => {
            // Step 3: default select-all.
            for (name, field) in &resource.fields {
                if field.selectable_by_default() {
                    columns.insert(name.clone());
                }
            }
            // All computed fields participate when no sparse fieldset narrows them.
            for name in &resource.compute_order {
                if resource.field(name).map(|f| f.is_computed()).unwrap_or(false) {
                    computed_fields.push(name.clone());
                }
            }
        }
    }

    // Step 4: union computed-field dependencies, tracking auxiliary additions.
    let mut auxiliary_columns = HashSet::new();
    for computed_name in &computed_fields {
        let Some(field) = resource.field(computed_name) else { continue };
        let Some(spec) = &field.computed else { continue };
        for dependency in &spec.dependencies {
            if columns.insert(dependency.clone()) {
                auxiliary_columns.insert(dependency.clone());
            }
        }
    }

    // Step 5: relationship-owned columns are always selected.
    for column in resource.always_selected_columns() {
        columns.insert(column);
    }

    Ok(FieldSelectionPlan {
        columns: columns.into_iter().collect(),
        computed_fields,
        auxiliary_columns,
    })
}

/// Resolve `filter[name]=value` pairs into physical filter conditions via
/// the resource's search schema (§4.4 "Filters").
pub fn build_filters(
    resource: &CompiledResource,
    filters: &indexmap::IndexMap<String, String>,
) -> Result<Vec<FilterCondition>> {
    let mut conditions = Vec::with_capacity(filters.len());
    for (name, value) in filters {
        let search = resource
            .search_schema
            .get(name)
            .ok_or_else(|| Error::validation(format!("/filter/{}", name), "unknown_filter"))?;
        conditions.push(FilterCondition {
            field: search.actual_field.clone(),
            operator: search.operator,
            value: value.clone(),
        });
    }
    Ok(conditions)
}

/// Resolve `sort=` terms against the resource's sortable whitelist (§4.4
/// "Sort and paginate").
pub fn build_sort(resource: &CompiledResource, terms: &[SortTerm]) -> Result<Vec<SortTerm>> {
    for term in terms {
        if !resource.is_sortable(&term.field) {
            return Err(Error::validation(format!("/sort/{}", term.field), "not_sortable"));
        }
    }
    Ok(terms.to_vec())
}

/// Resolve the effective page parameters, applying the default page size
/// when the client specified none and capping the requested size at the
/// tiered maximum (engine default, possibly overridden per resource).
pub fn build_page(requested: &PageParams, default_size: &Tiered<i64>, max_size: &Tiered<i64>) -> PageParams {
    let cap = max_size.resolve();
    match requested {
        PageParams::None => PageParams::NumberSize {
            number: Some(1),
            size: Some(default_size.resolve().min(cap)),
        },
        PageParams::NumberSize { number, size } => PageParams::NumberSize {
            number: Some(number.unwrap_or(1)),
            size: Some(size.unwrap_or_else(|| default_size.resolve()).min(cap)),
        },
        PageParams::OffsetLimit { offset, limit } => PageParams::OffsetLimit {
            offset: Some(offset.unwrap_or(0)),
            limit: Some(limit.unwrap_or_else(|| default_size.resolve()).min(cap)),
        },
    }
}

/// The complete plan for a single collection or single-item read (§4.4).
#[derive(Clone, Debug, Default)]
pub struct QueryPlan {
    pub selection: FieldSelectionPlan,
    pub query_request: QueryRequest,
    pub include: Vec<IncludeNode>,
}

/// Build the full read plan for a resource: field selection, filters,
/// sort, pagination, and the include tree, from an already-validated
/// [`ParsedQuery`].
pub fn plan_read(
    resource: &CompiledResource,
    registry: &ResourceRegistry,
    parsed: &ParsedQuery,
    default_size: &Tiered<i64>,
    max_size: &Tiered<i64>,
    include_depth_limit: u32,
    count_total: bool,
) -> Result<QueryPlan> {
    let requested_fields = parsed.fields.get(&resource.name).map(|v| v.as_slice());
    let selection = select_fields(resource, requested_fields)?;
    let filters = build_filters(resource, &parsed.filters)?;
    let sort = build_sort(resource, &parsed.sort)?;
    let page = build_page(&parsed.page, default_size, max_size);
    let include = build_include_tree(&parsed.include, resource, registry, include_depth_limit)?;

    Ok(QueryPlan {
        selection: selection.clone(),
        query_request: QueryRequest {
            columns: selection.columns,
            filters,
            sort,
            page,
            count_total,
        },
        include,
    })
}

/// Build a single-item read plan: the same selection and include tree as a
/// collection read, but no filters, sort, or pagination of its own (the id
/// is applied separately by the storage call via `StorageBackend::data_get`).
pub fn plan_single(
    resource: &CompiledResource,
    registry: &ResourceRegistry,
    fields: Option<&[String]>,
    include_paths: &[Vec<String>],
    include_depth_limit: u32,
) -> Result<QueryPlan> {
    let selection = select_fields(resource, fields)?;
    let include = build_include_tree(include_paths, resource, registry, include_depth_limit)?;

    Ok(QueryPlan {
        selection: selection.clone(),
        query_request: QueryRequest {
            columns: selection.columns,
            filters: Vec::new(),
            sort: Vec::new(),
            page: PageParams::None,
            count_total: false,
        },
        include,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::field::{Field, FieldKind};
    use crate::schema::relationship::Relationship;
    use crate::schema::resource::{FilterOperator, ResourceBuilder, SearchField};
    use serde_json::Value;
    use std::sync::Arc;

    fn sample_resource() -> CompiledResource {
        ResourceBuilder::new("articles")
            .field(Field::new("title", FieldKind::String))
            .field(Field::new("author_id", FieldKind::String))
            .field(Field::new("secret", FieldKind::String).always_hidden())
            .field(
                Field::new("word_count", FieldKind::Integer)
                    .computed(vec!["body".into()], Arc::new(|_| Value::Null)),
            )
            .field(Field::new("body", FieldKind::String).hidden())
            .relationship(Relationship::BelongsTo {
                alias: "author".into(),
                foreign_key: "author_id".into(),
                target: "users".into(),
            })
            .search_field(SearchField {
                name: "title".into(),
                actual_field: "title".into(),
                operator: FilterOperator::ILike,
                join: None,
            })
            .compile()
            .unwrap()
    }

    #[test]
    fn test_default_selection_excludes_hidden_and_computed() {
        let resource = sample_resource();
        let plan = select_fields(&resource, None).unwrap();
        assert!(plan.columns.contains(&"title".to_string()));
        assert!(plan.columns.contains(&"author_id".to_string()));
        assert!(!plan.columns.contains(&"secret".to_string()));
        assert!(plan.computed_fields.contains(&"word_count".to_string()));
        // dependency of word_count pulled in as auxiliary since it's a
        // normally-hidden field not otherwise selected by default.
        assert!(plan.columns.contains(&"body".to_string()));
        assert!(plan.auxiliary_columns.contains("body"));
    }

    #[test]
    fn test_sparse_fieldset_rejects_unknown_field() {
        let resource = sample_resource();
        let requested = vec!["ghost".to_string()];
        assert!(select_fields(&resource, Some(&requested)).is_err());
    }

    #[test]
    fn test_sparse_fieldset_drops_always_hidden_silently() {
        let resource = sample_resource();
        let requested = vec!["title".to_string(), "secret".to_string()];
        let plan = select_fields(&resource, Some(&requested)).unwrap();
        assert!(plan.columns.contains(&"title".to_string()));
        assert!(!plan.columns.contains(&"secret".to_string()));
    }

    #[test]
    fn test_always_selected_fk_present_even_with_sparse_fieldset() {
        let resource = sample_resource();
        let requested = vec!["title".to_string()];
        let plan = select_fields(&resource, Some(&requested)).unwrap();
        assert!(plan.columns.contains(&"author_id".to_string()));
    }

    #[test]
    fn test_build_filters_resolves_search_schema() {
        let resource = sample_resource();
        let mut filters = indexmap::IndexMap::new();
        filters.insert("title".to_string(), "widget".to_string());
        let conditions = build_filters(&resource, &filters).unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].field, "title");
        assert_eq!(conditions[0].operator, FilterOperator::ILike);
    }

    #[test]
    fn test_build_filters_rejects_unknown_key() {
        let resource = sample_resource();
        let mut filters = indexmap::IndexMap::new();
        filters.insert("ghost".to_string(), "x".to_string());
        assert!(build_filters(&resource, &filters).is_err());
    }

    #[test]
    fn test_build_page_applies_default_and_cap() {
        let default_size = Tiered::new(25);
        let max_size = Tiered::new(100);
        let page = build_page(&PageParams::None, &default_size, &max_size);
        assert_eq!(page, PageParams::NumberSize { number: Some(1), size: Some(25) });

        let requested = PageParams::NumberSize { number: Some(2), size: Some(500) };
        let capped = build_page(&requested, &default_size, &max_size);
        assert_eq!(capped, PageParams::NumberSize { number: Some(2), size: Some(100) });
    }
}
