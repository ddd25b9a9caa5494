//! Resource Engine core - a JSON:API-compliant REST framework backed by a
//! relational database.
//!
//! # Architecture
//!
//! The request processing pipeline:
//!
//! 1. **Schema Compiler** (`schema`) - declarative resource registration, compiled once at startup
//! 2. **Payload Codec** (`codec`) - JSON:API wire documents <-> simplified records
//! 3. **Validator** (`validate`) - structural and attribute-level validation
//! 4. **Query Planner** (`plan`) - field selection, filters, sort, pagination, include tree
//! 5. **Storage Executor** (`storage`) - the collaborator contract a concrete database adapter implements
//! 6. **Write Coordinator** (`write`) - POST/PUT/PATCH/DELETE orchestration and many-to-many sync
//! 7. **Hook Dispatcher** (`hooks`) - named, ordered extension points
//! 8. **Permission Gate** (`gate`) - the single authorization procedure
//!
//! `read` and `write` tie these together into the control flow a transport
//! collaborator (e.g. `resource-engine-server`) drives per request.

pub mod codec;
pub mod config;
pub mod error;
pub mod gate;
pub mod hooks;
pub mod plan;
pub mod query_string;
pub mod read;
pub mod schema;
pub mod simplified;
pub mod storage;
pub mod validate;
pub mod wire;
pub mod write;

// Re-export main types
pub use codec::Codec;
pub use config::{EngineConfig, LogLevel, Tiered};
pub use error::{Error, Result, Violation};
pub use gate::{AllowAll, AuthContext, GateRequest, PermissionGate, PolicyGate};
pub use hooks::{Hook, HookRegistry, Method, Phase, PhaseContext};
pub use plan::{build_filters, build_page, build_sort, select_fields, FieldSelectionPlan, QueryPlan};
pub use query_string::{parse_query_string, PageParams, ParsedQuery, SortTerm};
pub use schema::{CompiledResource, Field, FieldKind, RegistryRef, Relationship, ResourceBuilder, ResourceRegistry};
pub use simplified::SimpleRecord;
pub use storage::{QueryRequest, QueryResultSet, StorageBackend, Transaction};
pub use validate::{ValidationMode, Validator, WriteMethod};
pub use wire::{Document, ResourceObject};
pub use write::{create, delete, replace, run_write, update, ReturnMode, WriteContext, WriteOutcome};

/// Prelude for common imports.
pub mod prelude {
    pub use super::codec::Codec;
    pub use super::config::{EngineConfig, Tiered};
    pub use super::error::{Error, Result, Violation};
    pub use super::gate::{AllowAll, AuthContext, PermissionGate};
    pub use super::hooks::{Hook, HookRegistry, Phase, PhaseContext};
    pub use super::schema::{CompiledResource, Field, FieldKind, RegistryRef, Relationship, ResourceBuilder, ResourceRegistry};
    pub use super::simplified::SimpleRecord;
    pub use super::storage::StorageBackend;
    pub use super::validate::Validator;
    pub use super::wire::Document;
    pub use super::write::{create, delete, replace, run_write, update, ReturnMode, WriteContext, WriteOutcome};
}
