//! Resource Engine HTTP server.
//!
//! Axum transport wiring plus a Postgres-backed `StorageBackend` for the
//! engine defined in `resource-engine-core`.

pub mod app;
pub mod resources;
pub mod state;
pub mod storage;

pub use state::AppState;
