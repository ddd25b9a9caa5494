//! Resource Engine HTTP server.
//!
//! Wires the declarative resource registry (`resources`), the Postgres
//! `StorageBackend` (`storage`), and the engine's request orchestration
//! (`resource_engine_core::{read, write}`) behind an Axum router speaking
//! JSON:API over HTTP.

use anyhow::Result;
use axum::{
    http::Method,
    routing::get,
    Router,
};
use resource_engine_auth::JwtConfig;
use resource_engine_core::gate::{AllowAll, PermissionGate};
use resource_engine_core::hooks::HookRegistry;
use resource_engine_core::schema::RegistryRef;
use resource_engine_core::EngineConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod resources;
mod state;
mod storage;

use app::{create_resource, delete_resource, get_one, list_collection, replace_resource, route_not_found, update_resource};
use state::AppState;
use storage::PgStorage;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "resource_engine=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    info!("Starting Resource Engine server");
    info!("Database: {}", mask_db_uri(&config.db_uri));

    let pool = PgPoolOptions::new()
        .max_connections(config.db_pool_size)
        .connect(&config.db_uri)
        .await?;
    info!("Connected to database");

    let registry = RegistryRef::new(resources::build_registry());
    info!("Registered {} resources", registry.get().names().count());

    let state = Arc::new(AppState {
        storage: PgStorage::new(pool, registry.clone()),
        registry,
        gate: Arc::new(AllowAll) as Arc<dyn PermissionGate>,
        hooks: Arc::new(HookRegistry::new()),
        jwt_config: JwtConfig {
            secret: config.jwt_secret.clone(),
            secret_is_base64: config.jwt_secret_is_base64,
            audience: config.jwt_aud.clone(),
            allow_anonymous: true,
        },
        config: config.clone(),
    });

    let app = Router::new()
        .route("/{resource}", get(list_collection).post(create_resource))
        .route("/{resource}/{id}", get(get_one).put(replace_resource).patch(update_resource).delete(delete_resource))
        .fallback(route_not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Mask credentials in a connection URI before logging it.
fn mask_db_uri(uri: &str) -> String {
    if let Some(at_pos) = uri.find('@') {
        if let Some(proto_end) = uri.find("://") {
            return format!("{}://***@{}", &uri[..proto_end], &uri[at_pos + 1..]);
        }
    }
    uri.to_string()
}
