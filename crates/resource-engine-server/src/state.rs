//! Application state.

use crate::storage::PgStorage;
use resource_engine_auth::JwtConfig;
use resource_engine_core::gate::PermissionGate;
use resource_engine_core::hooks::HookRegistry;
use resource_engine_core::schema::RegistryRef;
use resource_engine_core::{EngineConfig, Tiered};
use std::sync::Arc;

/// Shared application state, built once at startup and cloned (`Arc`-wrapped
/// by the caller) into every Axum handler.
pub struct AppState {
    /// Compiled resource registry — read-only after startup (§5 "Shared
    /// resources": the registry needs no locking once populated).
    pub registry: RegistryRef,
    /// The concrete Postgres-backed Storage Executor.
    pub storage: PgStorage,
    /// The single Permission Gate all reads and writes route through.
    pub gate: Arc<dyn PermissionGate>,
    /// The ordered hook registry (§4.7).
    pub hooks: Arc<HookRegistry>,
    /// Engine-wide configuration (page sizes, include depth, strict FKs).
    pub config: EngineConfig,
    /// JWT configuration for bearer-token authentication.
    pub jwt_config: JwtConfig,
}

impl AppState {
    pub fn default_page_size(&self) -> Tiered<i64> {
        Tiered::new(self.config.default_page_size)
    }

    pub fn max_page_size(&self) -> Tiered<i64> {
        Tiered::new(self.config.max_page_size)
    }
}
