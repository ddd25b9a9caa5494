//! Error types for the Resource Engine.
//!
//! Every error kind maps to exactly one wire status code (§7 of the
//! specification this engine implements) and can be rendered as one or more
//! JSON:API error objects.

use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Result type for Resource Engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A single field-level validation failure.
///
/// `pointer` is a JSON pointer into the original request document (Testable
/// Property 8), e.g. `/data/attributes/body` or
/// `/data/relationships/author/data/id`.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Violation {
    pub pointer: String,
    pub rule: String,
    pub detail: Option<String>,
}

impl Violation {
    pub fn new(pointer: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            rule: rule.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Main error type for the Resource Engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Request body fails structural JSON:API rules (400).
    #[error("malformed request: {0}")]
    PayloadShape(String),

    /// Well-formed but violates schema, search, or sort rules (422).
    #[error("validation failed ({} violation(s))", .0.len())]
    Validation(Vec<Violation>),

    /// Target id does not exist (404).
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Unique constraint violated or precondition failed (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Permission Gate denied (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Transport reported an unacceptable media type (415).
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// Misconfigured resource definition, raised at registration (not per request).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Error surfaced by the concrete storage collaborator.
    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),

    /// Anything else (transport wiring bugs, pool exhaustion, etc).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A single validation violation, convenience constructor.
    pub fn validation(pointer: impl Into<String>, rule: impl Into<String>) -> Self {
        Self::Validation(vec![Violation::new(pointer, rule)])
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PayloadShape(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(db_err) => db_err.status_code(),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadShape(_) => "RE-PAYLOAD-SHAPE",
            Self::Validation(_) => "RE-VALIDATION",
            Self::ResourceNotFound(_) => "RE-NOT-FOUND",
            Self::Conflict(_) => "RE-CONFLICT",
            Self::Forbidden(_) => "RE-FORBIDDEN",
            Self::UnsupportedContentType(_) => "RE-UNSUPPORTED-MEDIA-TYPE",
            Self::Configuration(_) => "RE-CONFIGURATION",
            Self::Storage(db_err) => db_err.code(),
            Self::Internal(_) => "RE-INTERNAL",
        }
    }

    /// Violations carried by this error, if any.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Validation(v) => v,
            _ => &[],
        }
    }

    /// Render as one JSON:API error object per violation (or a single
    /// generic object when there are none).
    pub fn to_json_api_errors(&self) -> Vec<serde_json::Value> {
        let status = self.status_code().as_u16().to_string();
        let code = self.code();

        let violations = self.violations();
        if violations.is_empty() {
            return vec![serde_json::json!({
                "status": status,
                "code": code,
                "title": self.title(),
                "detail": self.to_string(),
            })];
        }

        violations
            .iter()
            .map(|v| {
                serde_json::json!({
                    "status": status,
                    "code": code,
                    "title": self.title(),
                    "detail": v.detail.clone().unwrap_or_else(|| v.rule.clone()),
                    "source": { "pointer": v.pointer },
                    "meta": { "rule": v.rule },
                })
            })
            .collect()
    }

    /// Full JSON:API error document: `{"errors": [...]}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "errors": self.to_json_api_errors() })
    }

    fn title(&self) -> &'static str {
        match self {
            Self::PayloadShape(_) => "Malformed Request",
            Self::Validation(_) => "Validation Failed",
            Self::ResourceNotFound(_) => "Resource Not Found",
            Self::Conflict(_) => "Conflict",
            Self::Forbidden(_) => "Forbidden",
            Self::UnsupportedContentType(_) => "Unsupported Media Type",
            Self::Configuration(_) => "Configuration Error",
            Self::Storage(_) => "Storage Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Error surfaced by the concrete storage collaborator (the SQL driver
/// behind the `StorageBackend` trait). Kept distinct from `Error` because
/// the mapping to a status code depends on the backend's error class, not
/// on engine-level semantics.
#[derive(Error, Debug)]
#[error("storage backend error [{code}]: {message}")]
pub struct DatabaseError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
    pub constraint: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
}

impl DatabaseError {
    /// Get HTTP status code based on the backend's error class.
    ///
    /// Codes follow the PostgreSQL convention
    /// (<https://www.postgresql.org/docs/current/errcodes-appendix.html>)
    /// since that is the reference driver, but any backend mapping onto the
    /// same class prefixes works identically.
    pub fn status_code(&self) -> StatusCode {
        match self.code.as_str() {
            c if c.starts_with("23") => StatusCode::CONFLICT, // integrity constraint violation
            c if c.starts_with("42") => StatusCode::BAD_REQUEST, // syntax/access rule violation
            c if c.starts_with("28") => StatusCode::FORBIDDEN, // invalid authorization
            c if c.starts_with("40") => StatusCode::CONFLICT,  // transaction rollback
            c if c.starts_with("53") => StatusCode::SERVICE_UNAVAILABLE, // insufficient resources
            c if c.starts_with("54") => StatusCode::PAYLOAD_TOO_LARGE, // program limit exceeded
            "P0001" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for API response.
    pub fn code(&self) -> &'static str {
        match self.code.as_str() {
            c if c.starts_with("23") => "RE-STORAGE-CONSTRAINT",
            c if c.starts_with("42") => "RE-STORAGE-SYNTAX",
            c if c.starts_with("28") => "RE-STORAGE-AUTH",
            _ => "RE-STORAGE-GENERIC",
        }
    }
}
