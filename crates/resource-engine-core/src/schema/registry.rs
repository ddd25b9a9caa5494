//! The resource registry: a stable, closed-over collection of compiled
//! resources, populated once at startup (§4.1).

use super::relationship::Relationship;
use super::resource::CompiledResource;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An immutable (after the second resolution pass) table of compiled
/// resources, keyed by name.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, CompiledResource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a compiled resource. Relationships referencing a resource not
    /// yet registered are accepted here (registration-order independence
    /// for cyclic graphs, e.g. `users` <-> `articles`) and validated in
    /// [`Self::resolve`].
    pub fn insert(&mut self, resource: CompiledResource) {
        self.resources.insert(resource.name.clone(), resource);
    }

    pub fn get(&self, name: &str) -> Option<&CompiledResource> {
        self.resources.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&CompiledResource> {
        self.get(name)
            .ok_or_else(|| Error::Configuration(format!("unknown resource '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(|s| s.as_str())
    }

    /// Second-pass validation, run once the whole registry is populated:
    /// every relationship target must name a registered resource, and
    /// every polymorphic allow-list entry must too.
    pub fn resolve(&self) -> Result<()> {
        for resource in self.resources.values() {
            for relationship in resource.relationships.values() {
                if let Some(target) = relationship.target() {
                    if !self.resources.contains_key(target) {
                        return Err(Error::Configuration(format!(
                            "resource '{}': relationship '{}' targets unregistered resource '{}'",
                            resource.name,
                            relationship.alias(),
                            target
                        )));
                    }
                }
                if let Relationship::BelongsToPolymorphic { targets, .. } = relationship {
                    for target in targets {
                        if !self.resources.contains_key(target) {
                            return Err(Error::Configuration(format!(
                                "resource '{}': polymorphic relationship '{}' allow-lists unregistered resource '{}'",
                                resource.name,
                                relationship.alias(),
                                target
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// A read-mostly handle to the registry, populated once at startup and
/// thereafter read without contention — the same pattern the surrounding
/// codebase uses for its compiled schema cache.
#[derive(Clone, Default)]
pub struct RegistryRef(Arc<RwLock<Arc<ResourceRegistry>>>);

impl RegistryRef {
    pub fn new(registry: ResourceRegistry) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(registry))))
    }

    pub fn get(&self) -> Arc<ResourceRegistry> {
        self.0.read().expect("registry lock poisoned").clone()
    }

    pub fn replace(&self, registry: ResourceRegistry) {
        let mut guard = self.0.write().expect("registry lock poisoned");
        *guard = Arc::new(registry);
    }
}
