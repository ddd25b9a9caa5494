//! Field declarations (§3: attribute name → kind, nullability, default,
//! visibility, validation rules, index hint, virtual flag, computed flag).

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The declared type of a field's value, used for coercion and wire typing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Json,
    Uuid,
    DateTime,
    Date,
    Time,
}

/// Visibility level (§3 "Field visibility").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Included unless a sparse fieldset omits it.
    NormallyVisible,
    /// Omitted unless explicitly requested.
    NormallyHidden,
    /// Never serialized, even if requested.
    AlwaysHidden,
}

/// A structural validation rule, checked by the Validator.
#[derive(Clone, Debug)]
pub enum Validation {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Range { min: Option<f64>, max: Option<f64> },
    OneOf(Vec<Value>),
}

/// A pure transform applied when reading a field's stored value out
/// (getter) or when writing a submitted value in (setter).
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// A pure function computing a field's value from the other attributes
/// already loaded on the record (§4.5 "Computed fields").
pub type ComputeFn = Arc<dyn Fn(&crate::simplified::SimpleRecord) -> Value + Send + Sync>;

/// A computed field's specification: which other fields it depends on, and
/// how to derive its value from them.
#[derive(Clone)]
pub struct ComputedSpec {
    pub dependencies: Vec<String>,
    pub compute: ComputeFn,
}

impl fmt::Debug for ComputedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedSpec")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A single declared field on a resource.
#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub default: Option<Value>,
    pub visibility: Visibility,
    pub validations: Vec<Validation>,
    pub indexed: bool,
    /// Exists only in input/output, never persisted.
    pub virtual_field: bool,
    /// Derived at read time; never accepted on input.
    pub computed: Option<ComputedSpec>,
    pub getter: Option<TransformFn>,
    pub setter: Option<TransformFn>,
    /// When set, this field is implicitly searchable at `filter[name]` using
    /// this operator, without a separate explicit search-schema entry
    /// (§4.1 "fields marked searchable in the schema").
    pub searchable: Option<super::resource::FilterOperator>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("nullable", &self.nullable)
            .field("visibility", &self.visibility)
            .field("virtual_field", &self.virtual_field)
            .field("computed", &self.computed.is_some())
            .finish_non_exhaustive()
    }
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
            default: None,
            visibility: Visibility::NormallyVisible,
            validations: Vec::new(),
            indexed: false,
            virtual_field: false,
            computed: None,
            getter: None,
            setter: None,
            searchable: None,
        }
    }

    pub fn searchable(mut self, op: super::resource::FilterOperator) -> Self {
        self.searchable = Some(op);
        self
    }

    pub fn required(mut self) -> Self {
        self.nullable = false;
        self.validations.push(Validation::Required);
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visibility = Visibility::NormallyHidden;
        self
    }

    pub fn always_hidden(mut self) -> Self {
        self.visibility = Visibility::AlwaysHidden;
        self
    }

    pub fn virtual_field(mut self) -> Self {
        self.virtual_field = true;
        self
    }

    pub fn computed(mut self, dependencies: Vec<String>, compute: ComputeFn) -> Self {
        self.computed = Some(ComputedSpec { dependencies, compute });
        self
    }

    pub fn validate(mut self, rule: Validation) -> Self {
        self.validations.push(rule);
        self
    }

    pub fn is_computed(&self) -> bool {
        self.computed.is_some()
    }

    /// Whether this field participates in default select-all (§4.4 step 3).
    pub fn selectable_by_default(&self) -> bool {
        matches!(self.visibility, Visibility::NormallyVisible)
            && !self.virtual_field
            && !self.is_computed()
    }
}
