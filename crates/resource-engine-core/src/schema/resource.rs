//! Resource declaration, compilation, and the search schema (§4.1).

use super::field::{Field, FieldKind};
use super::relationship::Relationship;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Operator a search-schema entry compares its field with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
}

impl FilterOperator {
    pub fn sql_operator(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
        }
    }
}

/// A cross-table join used by a virtual search field.
#[derive(Clone, Debug)]
pub struct JoinSpec {
    pub relationship: String,
    pub field: String,
}

/// An entry in a resource's search schema: the physical field a filter name
/// compares against, the operator, and (for virtual fields) a join.
#[derive(Clone, Debug)]
pub struct SearchField {
    /// The name clients use: `filter[<name>]=value`.
    pub name: String,
    /// The underlying field this filter compares (may differ from `name`
    /// for the multi-filter expansion form, via `actual_field`).
    pub actual_field: String,
    pub operator: FilterOperator,
    pub join: Option<JoinSpec>,
}

/// Per-resource engine options (§3 "engine options").
#[derive(Clone, Debug)]
pub struct ResourceOptions {
    pub default_page_size: Option<i64>,
    pub max_page_size: Option<i64>,
    pub include_depth_limit: Option<u32>,
    pub default_sort: Vec<String>,
    pub url_prefix: Option<String>,
    /// Whether POST/PUT may assign a client-supplied id (upsert-by-PUT, §3
    /// "Lifecycle": "upsert is a legal PUT outcome if the resource supports
    /// client-assigned ids").
    pub allows_client_ids: bool,
    /// Whether the per-call "return record" mode override is permitted
    /// (§4.6, §10 precedence tier).
    pub allows_representation_override: bool,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            default_page_size: None,
            max_page_size: None,
            include_depth_limit: None,
            default_sort: Vec::new(),
            url_prefix: None,
            allows_client_ids: false,
            allows_representation_override: false,
        }
    }
}

/// A resource declaration, built up before compilation.
pub struct ResourceBuilder {
    name: String,
    id_field: String,
    fields: IndexMap<String, Field>,
    relationships: IndexMap<String, Relationship>,
    explicit_search: Vec<SearchField>,
    sortable: HashSet<String>,
    options: ResourceOptions,
}

impl ResourceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut fields = IndexMap::new();
        let name = name.into();
        fields.insert("id".to_string(), Field::new("id", FieldKind::String).required());
        Self {
            name,
            id_field: "id".to_string(),
            fields,
            relationships: IndexMap::new(),
            explicit_search: Vec::new(),
            sortable: HashSet::new(),
            options: ResourceOptions::default(),
        }
    }

    pub fn id_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        self.fields.remove(&self.id_field);
        self.fields.insert(name.clone(), Field::new(&name, kind).required());
        self.id_field = name;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.insert(relationship.alias().to_string(), relationship);
        self
    }

    pub fn search_field(mut self, search: SearchField) -> Self {
        self.explicit_search.push(search);
        self
    }

    pub fn sortable(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sortable.extend(names.into_iter().map(|n| n.into()));
        self
    }

    pub fn options(mut self, options: ResourceOptions) -> Self {
        self.options = options;
        self
    }

    /// Compile this declaration into an immutable `CompiledResource`.
    ///
    /// Runs the steps of §4.1 that do not require knowledge of other
    /// resources (polymorphic allow-list existence is checked later, by the
    /// registry's second pass, once the whole registry is populated).
    pub fn compile(self) -> Result<CompiledResource> {
        // Default belongs-to fields to the resource's id type is handled at
        // the registry level, since the foreign-key field is a plain Field
        // declared by the caller; nothing to default here beyond validating
        // that every relationship's alias doesn't collide with a field name.
        for relationship in self.relationships.values() {
            if self.fields.contains_key(relationship.alias()) {
                return Err(Error::Configuration(format!(
                    "resource '{}': relationship alias '{}' collides with a field name",
                    self.name,
                    relationship.alias()
                )));
            }
        }

        for relationship in self.relationships.values() {
            if let Relationship::BelongsToPolymorphic { targets, .. } = relationship {
                if targets.is_empty() {
                    return Err(Error::Configuration(format!(
                        "resource '{}': polymorphic relationship '{}' has an empty target allow-list",
                        self.name,
                        relationship.alias()
                    )));
                }
            }
        }

        let search_schema = synthesize_search_schema(&self.name, &self.fields, self.explicit_search)?;
        let compute_order = topological_compute_order(&self.name, &self.fields)?;

        Ok(CompiledResource {
            name: self.name,
            id_field: self.id_field,
            fields: self.fields,
            relationships: self.relationships,
            search_schema,
            sortable: self.sortable,
            options: self.options,
            compute_order,
        })
    }
}

/// Combine any explicit search schema with fields marked searchable; the
/// explicit schema wins on name collisions (§4.1 "collision policy").
fn synthesize_search_schema(
    resource_name: &str,
    fields: &IndexMap<String, Field>,
    explicit: Vec<SearchField>,
) -> Result<IndexMap<String, SearchField>> {
    let mut schema = IndexMap::new();

    for (name, field) in fields {
        if let Some(op) = field.searchable {
            schema.insert(
                name.clone(),
                SearchField {
                    name: name.clone(),
                    actual_field: name.clone(),
                    operator: op,
                    join: None,
                },
            );
        }
    }

    for entry in explicit {
        if !entry.actual_field.is_empty() && entry.join.is_none() && !fields.contains_key(&entry.actual_field) {
            return Err(Error::Configuration(format!(
                "resource '{}': search field '{}' references unknown field '{}'",
                resource_name, entry.name, entry.actual_field
            )));
        }
        schema.insert(entry.name.clone(), entry);
    }

    Ok(schema)
}

/// Topologically sort fields by declared getter/setter dependencies,
/// failing on cycles (§4.1 step 6). Only computed fields carry
/// dependencies today; non-computed fields sort before any computed field
/// that depends on them.
fn topological_compute_order(resource_name: &str, fields: &IndexMap<String, Field>) -> Result<Vec<String>> {
    let mut order = Vec::new();
    let mut visiting: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();

    fn visit(
        name: &str,
        fields: &IndexMap<String, Field>,
        order: &mut Vec<String>,
        visiting: &mut HashSet<String>,
        visited: &mut HashSet<String>,
        resource_name: &str,
    ) -> Result<()> {
        if visited.contains(name) {
            return Ok(());
        }
        if visiting.contains(name) {
            return Err(Error::Configuration(format!(
                "resource '{}': computed-field dependency cycle at '{}'",
                resource_name, name
            )));
        }
        visiting.insert(name.to_string());
        if let Some(field) = fields.get(name) {
            if let Some(computed) = &field.computed {
                for dep in &computed.dependencies {
                    visit(dep, fields, order, visiting, visited, resource_name)?;
                }
            }
        }
        visiting.remove(name);
        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    for name in fields.keys() {
        visit(name, fields, &mut order, &mut visiting, &mut visited, resource_name)?;
    }

    Ok(order)
}

/// An immutable, compiled resource definition, cached on the registry.
#[derive(Clone)]
pub struct CompiledResource {
    pub name: String,
    pub id_field: String,
    pub fields: IndexMap<String, Field>,
    pub relationships: IndexMap<String, Relationship>,
    pub search_schema: IndexMap<String, SearchField>,
    pub sortable: HashSet<String>,
    pub options: ResourceOptions,
    /// Fields in dependency order: a computed field always appears after
    /// every field it depends on.
    pub compute_order: Vec<String>,
}

impl CompiledResource {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn relationship(&self, alias: &str) -> Option<&Relationship> {
        self.relationships.get(alias)
    }

    pub fn is_sortable(&self, name: &str) -> bool {
        self.sortable.contains(name)
    }

    /// Columns that must always be selected to build relationships,
    /// regardless of sparse fieldsets (§4.4 step 5).
    pub fn always_selected_columns(&self) -> HashSet<String> {
        let mut columns: HashSet<String> = HashSet::new();
        columns.insert(self.id_field.clone());
        for relationship in self.relationships.values() {
            for column in relationship.owned_columns() {
                if self
                    .fields
                    .get(column)
                    .map(|f| !matches!(f.visibility, super::field::Visibility::AlwaysHidden))
                    .unwrap_or(true)
                {
                    columns.insert(column.to_string());
                }
            }
        }
        columns
    }
}

/// Map of resource name to relationships that reference it but were not yet
/// resolvable at builder time (kept for registry bookkeeping; currently
/// relationships always name their target directly, so this exists for
/// parity with the registry's two-pass resolution story).
pub type UnresolvedEdges = HashMap<String, Vec<String>>;
