//! Axum request handlers: the transport collaborator that drives
//! `resource_engine_core::{read, write}` per request and renders the result
//! through `resource_engine_response`.

use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use resource_engine_auth::authenticate;
use resource_engine_core::gate::AuthContext;
use resource_engine_core::hooks::Method as EngineMethod;
use resource_engine_core::query_string::parse_query_string;
use resource_engine_core::read::{read_many, read_one, ReadContext};
use resource_engine_core::storage::{StorageBackend, Transaction};
use resource_engine_core::wire::Document;
use resource_engine_core::write::{self, ReturnMode, WriteContext, WriteOutcome};
use resource_engine_core::Error;
use resource_engine_response::{document_response, error_response, write_response};
use std::sync::Arc;
use tracing::debug;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn authenticate_request(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, Error> {
    let header = headers.get(http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    authenticate(header, &state.jwt_config).map_err(|e| Error::Forbidden(e.to_string()))
}

/// `Prefer: return=minimal|representation|none`, the convention this
/// engine's donor already used for the same per-call override (§4.6's
/// "per-call override... is permitted only if the resource enables it").
fn parse_return_mode_override(headers: &HeaderMap) -> Option<ReturnMode> {
    let value = headers.get("prefer").and_then(|v| v.to_str().ok())?;
    for directive in value.split(';') {
        let directive = directive.trim();
        if let Some(mode) = directive.strip_prefix("return=") {
            return match mode.trim() {
                "minimal" => Some(ReturnMode::Minimal),
                "representation" => Some(ReturnMode::Full),
                "none" => Some(ReturnMode::None),
                _ => None,
            };
        }
    }
    None
}

fn reject_unsupported_media_type(headers: &HeaderMap, body_is_empty: bool) -> Result<(), Error> {
    if body_is_empty {
        return Ok(());
    }
    let Some(content_type) = headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return Ok(());
    };
    let base = content_type.split(';').next().unwrap_or(content_type).trim();
    if base == resource_engine_response::JSON_API_CONTENT_TYPE || base == "application/json" {
        Ok(())
    } else {
        Err(Error::UnsupportedContentType(base.to_string()))
    }
}

fn into_axum_response(response: resource_engine_response::Response) -> Response {
    let mut builder = Response::builder().status(response.status);
    for (name, value) in response.headers.iter() {
        builder = builder.header(name, value);
    }
    builder.body(Body::from(response.body)).unwrap_or_else(|_| Response::new(Body::empty()))
}

fn into_error_response(error: Error) -> Response {
    into_axum_response(error_response(&error))
}

/// Run `f` inside a freshly-opened, read-only transaction: committed on
/// success, rolled back on failure. Reads never reuse a caller-supplied
/// transaction (there is no caller above the HTTP boundary here), so this is
/// simpler than `write::run_write`'s ownership dance.
async fn with_read_tx<T, F, Fut>(storage: &dyn StorageBackend, f: F) -> Result<T, Error>
where
    F: FnOnce(&mut dyn Transaction) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut tx = storage.new_transaction().await?;
    match f(tx.as_mut()).await {
        Ok(value) => {
            storage.commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            let _ = storage.rollback(tx).await;
            Err(err)
        }
    }
}

impl AppState {
    /// Built fresh per-request from a snapshot of the (hot-reloadable)
    /// registry, so a concurrent `RegistryRef::replace` never invalidates a
    /// request already in flight.
    fn read_context<'a>(&'a self, registry: &'a resource_engine_core::schema::ResourceRegistry, auth: &'a AuthContext) -> ReadContext<'a> {
        ReadContext {
            registry,
            storage: &self.storage,
            gate: self.gate.as_ref(),
            hooks: self.hooks.as_ref(),
            auth,
            default_page_size: self.default_page_size(),
            max_page_size: self.max_page_size(),
        }
    }

    fn write_context<'a>(&'a self, registry: &'a resource_engine_core::schema::ResourceRegistry, auth: &'a AuthContext) -> WriteContext<'a> {
        WriteContext {
            registry,
            storage: &self.storage,
            gate: self.gate.as_ref(),
            hooks: self.hooks.as_ref(),
            auth,
            default_page_size: self.default_page_size(),
            max_page_size: self.max_page_size(),
            strict_foreign_keys: self.config.strict_foreign_keys,
        }
    }
}

/// `GET /:resource`.
pub async fn list_collection(State(state): State<Arc<AppState>>, Path(resource): Path<String>, uri: axum::http::Uri, headers: HeaderMap) -> Response {
    let outcome = async {
        let auth = authenticate_request(&state, &headers)?;
        let parsed = parse_query_string(uri.query().unwrap_or(""));
        let registry = state.registry.get();
        let read_ctx = state.read_context(&registry, &auth);
        with_read_tx(&state.storage, |tx| async { read_many(&read_ctx, tx, &resource, &parsed).await }).await
    }
    .await;

    match outcome {
        Ok(document) => document_response(&document).map(into_axum_response).unwrap_or_else(|_| into_error_response(Error::Internal("failed to encode response body".into()))),
        Err(err) => into_error_response(err),
    }
}

/// `GET /:resource/:id`.
pub async fn get_one(State(state): State<Arc<AppState>>, Path((resource, id)): Path<(String, String)>, uri: axum::http::Uri, headers: HeaderMap) -> Response {
    let outcome = async {
        let auth = authenticate_request(&state, &headers)?;
        let parsed = parse_query_string(uri.query().unwrap_or(""));
        let registry = state.registry.get();
        let read_ctx = state.read_context(&registry, &auth);
        let document = with_read_tx(&state.storage, |tx| async { read_one(&read_ctx, tx, &resource, &id, &parsed).await }).await?;
        document.ok_or_else(|| Error::ResourceNotFound(format!("{resource}/{id}")))
    }
    .await;

    match outcome {
        Ok(document) => document_response(&document).map(into_axum_response).unwrap_or_else(|_| into_error_response(Error::Internal("failed to encode response body".into()))),
        Err(err) => into_error_response(err),
    }
}

async fn read_body(request: axum::extract::Request) -> Result<(HeaderMap, bytes::Bytes), Error> {
    let headers = request.headers().clone();
    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| Error::PayloadShape(format!("could not read request body: {e}")))?;
    Ok((headers, body))
}

fn parse_document(body: &bytes::Bytes) -> Result<Document, Error> {
    if body.is_empty() {
        return Err(Error::PayloadShape("write requests require a JSON:API document body".into()));
    }
    serde_json::from_slice::<Document>(body).map_err(|e| Error::PayloadShape(format!("invalid JSON:API document: {e}")))
}

fn location_prefix(resource: &str) -> String {
    format!("/{resource}")
}

fn write_status(method: EngineMethod, outcome: &WriteOutcome) -> StatusCode {
    match (method, outcome) {
        (_, WriteOutcome::None) => StatusCode::NO_CONTENT,
        (EngineMethod::Post, _) => StatusCode::CREATED,
        _ => StatusCode::OK,
    }
}

/// `POST /:resource`.
pub async fn create_resource(State(state): State<Arc<AppState>>, Path(resource): Path<String>, request: axum::extract::Request) -> Response {
    let outcome = async {
        let (headers, body) = read_body(request).await?;
        reject_unsupported_media_type(&headers, body.is_empty())?;
        let auth = authenticate_request(&state, &headers)?;
        let document = parse_document(&body)?;
        let return_override = parse_return_mode_override(&headers);
        let registry = state.registry.get();
        let write_ctx = state.write_context(&registry, &auth);

        write::run_write(&write_ctx, None, &resource, EngineMethod::Post, |tx| {
            Box::pin(async { write::create(&write_ctx, tx, &resource, &document, return_override).await })
        })
        .await
    }
    .await;

    match outcome {
        Ok(outcome) => {
            let status = write_status(EngineMethod::Post, &outcome);
            write_response(&outcome, status, Some(&location_prefix(&resource))).map(into_axum_response).unwrap_or_else(|_| into_error_response(Error::Internal("failed to encode response body".into())))
        }
        Err(err) => into_error_response(err),
    }
}

/// `PUT /:resource/:id`.
pub async fn replace_resource(State(state): State<Arc<AppState>>, Path((resource, id)): Path<(String, String)>, request: axum::extract::Request) -> Response {
    let outcome = async {
        let (headers, body) = read_body(request).await?;
        reject_unsupported_media_type(&headers, body.is_empty())?;
        let auth = authenticate_request(&state, &headers)?;
        let document = parse_document(&body)?;
        let return_override = parse_return_mode_override(&headers);
        let registry = state.registry.get();
        let write_ctx = state.write_context(&registry, &auth);

        write::run_write(&write_ctx, None, &resource, EngineMethod::Put, |tx| {
            Box::pin(async { write::replace(&write_ctx, tx, &resource, &id, &document, return_override).await })
        })
        .await
    }
    .await;

    match outcome {
        Ok(outcome) => {
            let status = write_status(EngineMethod::Put, &outcome);
            write_response(&outcome, status, Some(&location_prefix(&resource))).map(into_axum_response).unwrap_or_else(|_| into_error_response(Error::Internal("failed to encode response body".into())))
        }
        Err(err) => into_error_response(err),
    }
}

/// `PATCH /:resource/:id`.
pub async fn update_resource(State(state): State<Arc<AppState>>, Path((resource, id)): Path<(String, String)>, request: axum::extract::Request) -> Response {
    let outcome = async {
        let (headers, body) = read_body(request).await?;
        reject_unsupported_media_type(&headers, body.is_empty())?;
        let auth = authenticate_request(&state, &headers)?;
        let document = parse_document(&body)?;
        let return_override = parse_return_mode_override(&headers);
        let registry = state.registry.get();
        let write_ctx = state.write_context(&registry, &auth);

        write::run_write(&write_ctx, None, &resource, EngineMethod::Patch, |tx| {
            Box::pin(async { write::update(&write_ctx, tx, &resource, &id, &document, return_override).await })
        })
        .await
    }
    .await;

    match outcome {
        Ok(outcome) => {
            let status = write_status(EngineMethod::Patch, &outcome);
            write_response(&outcome, status, Some(&location_prefix(&resource))).map(into_axum_response).unwrap_or_else(|_| into_error_response(Error::Internal("failed to encode response body".into())))
        }
        Err(err) => into_error_response(err),
    }
}

/// `DELETE /:resource/:id`.
pub async fn delete_resource(State(state): State<Arc<AppState>>, Path((resource, id)): Path<(String, String)>, headers: HeaderMap) -> Response {
    let outcome = async {
        let auth = authenticate_request(&state, &headers)?;
        let registry = state.registry.get();
        let write_ctx = state.write_context(&registry, &auth);

        write::run_write(&write_ctx, None, &resource, EngineMethod::Delete, |tx| Box::pin(async { write::delete(&write_ctx, tx, &resource, &id).await })).await
    }
    .await;

    match outcome {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => into_error_response(err),
    }
}

/// Fallback for any path that doesn't match a registered resource route.
pub async fn route_not_found(uri: axum::http::Uri) -> Response {
    debug!(path = %uri.path(), "no route registered");
    into_error_response(Error::ResourceNotFound(uri.path().to_string()))
}
