//! Response formatting for the Resource Engine.
//!
//! Builds the JSON:API document envelope and HTTP headers a transport
//! collaborator hands back to the client, from the engine's own `Document`,
//! `WriteOutcome`, and `Error` types. No content negotiation: every body is
//! `application/vnd.api+json` (§6 "wire format").

mod headers;
mod json;

pub use headers::{build_response_headers, JSON_API_CONTENT_TYPE};
pub use json::{format_document, format_error};

use http::{HeaderMap, HeaderValue, StatusCode};
use resource_engine_core::wire::Document;
use resource_engine_core::write::WriteOutcome;
use resource_engine_core::Error;

/// A formatted HTTP response, transport-agnostic (the server crate adapts
/// this to an Axum `Response`).
#[derive(Clone, Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: bytes::Bytes,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<bytes::Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, bytes::Bytes::new())
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            http::header::HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
    }
}

/// Format a successfully-read document (single resource or collection) as a
/// 200 response (§6 status codes).
pub fn document_response(document: &Document) -> Result<Response, serde_json::Error> {
    let body = format_document(document)?;
    let mut response = Response::new(StatusCode::OK, body);
    response.headers = build_response_headers(None);
    Ok(response)
}

/// Format a write's outcome. `location` is the resource's URL (without id)
/// and is only consulted for `WriteOutcome::Document`/`Minimal` results
/// coming from a POST, to build the `Location` header on 201.
pub fn write_response(
    outcome: &WriteOutcome,
    status_for_document: StatusCode,
    url_prefix: Option<&str>,
) -> Result<Response, serde_json::Error> {
    match outcome {
        WriteOutcome::None => Ok(Response::empty(StatusCode::NO_CONTENT)),
        WriteOutcome::Minimal(identifier) => {
            let doc = Document::single(resource_engine_core::wire::ResourceObject {
                kind: identifier.kind.clone(),
                id: Some(identifier.id.clone()),
                ..Default::default()
            });
            let body = format_document(&doc)?;
            let mut response = Response::new(status_for_document, body);
            let location = url_prefix.map(|prefix| format!("{prefix}/{}", identifier.id));
            response.headers = build_response_headers(location.as_deref());
            Ok(response)
        }
        WriteOutcome::Document(document) => {
            let body = format_document(document)?;
            let mut response = Response::new(status_for_document, body);
            let location = url_prefix.and_then(|prefix| {
                document_id(document).map(|id| format!("{prefix}/{id}"))
            });
            response.headers = build_response_headers(location.as_deref());
            Ok(response)
        }
    }
}

fn document_id(document: &Document) -> Option<String> {
    use resource_engine_core::wire::DocumentData;
    match document.data.as_ref()? {
        DocumentData::Single(resource) => resource.id.clone(),
        _ => None,
    }
}

/// Format an engine error as a JSON:API error document, status code taken
/// from `Error::status_code` (§7).
pub fn error_response(error: &Error) -> Response {
    let body = format_error(error);
    let mut response = Response::new(error.status_code(), body);
    response.headers = build_response_headers(None);
    response
}
