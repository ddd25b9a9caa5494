//! The Permission Gate (§4.8): a single central procedure invoked before
//! each phase that reads or writes, authorizing `{method, subject, auth,
//! context}`.
//!
//! The gate is expressed as one trait with one async method. The engine
//! ships a permissive default (`AllowAll`); `resource-engine-auth` provides
//! a composable `PolicyGate` that dispatches to per-resource closures
//! registered at startup, mirroring the registry-lookup style used for
//! relationship kinds and hooks rather than dynamic property lookup.

use crate::error::{Error, Result};
use crate::hooks::Method;
use crate::simplified::SimpleRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// The authenticated caller, as handed to the gate. Transport-agnostic:
/// whatever the authentication collaborator extracts from a bearer token or
/// session gets mapped into this shape before the engine sees it.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    /// Stable identifier for the caller (e.g. a `sub` claim), if any.
    pub subject: Option<String>,
    /// Arbitrary claims the auth collaborator attached to this caller.
    pub claims: HashMap<String, serde_json::Value>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn claim(&self, key: &str) -> Option<&serde_json::Value> {
        self.claims.get(key)
    }
}

/// Everything the gate needs to decide: the method being attempted, the
/// resource it targets, the caller, and (for reads on single items) the
/// minimal record fetched for row-level checks (§4.8 "this allows row-level
/// policies... without double-fetching").
pub struct GateRequest<'a> {
    pub method: Method,
    pub resource: &'a str,
    pub auth: &'a AuthContext,
    /// The minimal record (id + whatever columns the policy needs), when
    /// one was fetched ahead of the gate call.
    pub minimal_record: Option<&'a SimpleRecord>,
}

/// A single central authorization procedure (§4.8).
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check(&self, request: &GateRequest<'_>) -> Result<()>;
}

/// The permissive default: every request is authorized. Suitable for
/// development or resources with no access control.
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn check(&self, _request: &GateRequest<'_>) -> Result<()> {
        Ok(())
    }
}

/// A policy closure: given the gate request, decide allow/deny.
pub type PolicyFn = Arc<dyn Fn(&GateRequest<'_>) -> Result<()> + Send + Sync>;

/// Dispatches to a per-resource policy closure registered at startup,
/// falling back to a default policy for resources with none registered
/// (§9 "dynamic dispatch on scopes[name] becomes a registry lookup").
#[derive(Clone, Default)]
pub struct PolicyGate {
    policies: HashMap<String, PolicyFn>,
    default_allows: bool,
}

impl PolicyGate {
    pub fn new() -> Self {
        Self {
            policies: HashMap::new(),
            default_allows: true,
        }
    }

    /// Deny by default for resources with no registered policy.
    pub fn deny_by_default(mut self) -> Self {
        self.default_allows = false;
        self
    }

    pub fn register(mut self, resource: impl Into<String>, policy: PolicyFn) -> Self {
        self.policies.insert(resource.into(), policy);
        self
    }
}

#[async_trait]
impl PermissionGate for PolicyGate {
    async fn check(&self, request: &GateRequest<'_>) -> Result<()> {
        match self.policies.get(request.resource) {
            Some(policy) => policy(request),
            None if self.default_allows => Ok(()),
            None => Err(Error::Forbidden(format!(
                "no permission policy registered for resource '{}'",
                request.resource
            ))),
        }
    }
}
