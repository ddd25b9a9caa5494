//! The Schema Compiler (§4.1): declarative resource registration, replacing
//! live database introspection with startup-time compilation.

pub mod field;
pub mod registry;
pub mod relationship;
pub mod resource;

pub use field::{ComputedSpec, Field, FieldKind, TransformFn, Validation, Visibility};
pub use registry::{RegistryRef, ResourceRegistry};
pub use relationship::Relationship;
pub use resource::{CompiledResource, FilterOperator, JoinSpec, ResourceBuilder, ResourceOptions, SearchField};
