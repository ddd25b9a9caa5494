//! The Hook Dispatcher (§4.7): named, ordered extension points invoked
//! around every phase of read and write.
//!
//! Hooks are registered against a closed set of phase tags (an enum, not a
//! string key, per §9's redesign note), each carrying a typed `PhaseContext`
//! specific to its phase family. A handler is an `async_trait` object
//! (`Arc<dyn Hook>`) stored in per-phase `Vec`s, preserving registration
//! order deterministically.

use crate::error::Result;
use crate::simplified::SimpleRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A closed set of phases a hook can attach to (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    BeforeProcessing,
    BeforeSchemaValidate,
    AfterSchemaValidate,
    CheckPermissions,
    BeforeData,
    AfterDataCall,
    EnrichRecord,
    EnrichAttributes,
    Finish,
    AfterCommit,
    AfterRollback,
}

impl Phase {
    /// All phases, in the fixed order the dispatcher fires them for a
    /// single request (a caller fires only the phases relevant to its
    /// control flow; this list documents the canonical ordering).
    pub const READ_ORDER: &'static [Phase] = &[
        Phase::BeforeProcessing,
        Phase::CheckPermissions,
        Phase::BeforeData,
        Phase::AfterDataCall,
        Phase::EnrichRecord,
        Phase::EnrichAttributes,
        Phase::Finish,
    ];

    pub const WRITE_ORDER: &'static [Phase] = &[
        Phase::BeforeProcessing,
        Phase::BeforeSchemaValidate,
        Phase::AfterSchemaValidate,
        Phase::CheckPermissions,
        Phase::BeforeData,
        Phase::AfterDataCall,
        Phase::Finish,
    ];
}

/// The HTTP-adjacent method a phase context is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// Context passed to every hook handler. Shared and mutable for the
/// duration of one phase; a hook may mutate `attributes`/`meta` but must
/// never mutate the record once [`Phase::Finish`] begins (§4.7).
#[derive(Clone, Debug)]
pub struct PhaseContext {
    pub resource: String,
    pub method: Method,
    pub phase: Phase,
    /// The record under construction/mutation, when one exists (absent for
    /// collection reads before rows are fetched).
    pub record: Option<SimpleRecord>,
    /// Free-form data hooks can stash and read back across phases of the
    /// same request (replaces the donor's duck-typed "scope" blob with a
    /// typed, per-request bag).
    pub meta: HashMap<String, Value>,
}

impl PhaseContext {
    pub fn new(resource: impl Into<String>, method: Method, phase: Phase) -> Self {
        Self {
            resource: resource.into(),
            method,
            phase,
            record: None,
            meta: HashMap::new(),
        }
    }

    pub fn with_record(mut self, record: SimpleRecord) -> Self {
        self.record = Some(record);
        self
    }
}

/// A single extension point. Implementors may mutate the shared
/// `PhaseContext`; returning `Err` aborts the in-flight request and
/// propagates to the transaction owner (§4.7 "Failures abort...").
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(&self, context: &mut PhaseContext) -> Result<()>;

    /// A human-readable name, used in tracing spans.
    fn name(&self) -> &str {
        "hook"
    }
}

/// Registry of hooks keyed by phase, run in declared registration order.
#[derive(Default, Clone)]
pub struct HookRegistry {
    handlers: HashMap<Phase, Vec<Arc<dyn Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a phase. Handlers for the same phase run in
    /// the order they were registered.
    pub fn register(&mut self, phase: Phase, hook: Arc<dyn Hook>) {
        self.handlers.entry(phase).or_default().push(hook);
    }

    /// Run every handler registered for `phase`, in order, stopping at the
    /// first failure.
    pub async fn dispatch(&self, phase: Phase, context: &mut PhaseContext) -> Result<()> {
        let Some(handlers) = self.handlers.get(&phase) else {
            return Ok(());
        };
        for handler in handlers {
            tracing::debug!(phase = ?phase, hook = handler.name(), resource = %context.resource, "dispatching hook");
            handler.call(context).await?;
        }
        Ok(())
    }

    pub fn handler_count(&self, phase: Phase) -> usize {
        self.handlers.get(&phase).map(|v| v.len()).unwrap_or(0)
    }
}
