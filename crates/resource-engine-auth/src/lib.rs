//! JWT-backed `AuthContext` extraction for the Resource Engine's Permission
//! Gate.
//!
//! This crate is the concrete, swappable adapter between a bearer token on
//! the wire and the engine's transport-agnostic
//! `resource_engine_core::gate::AuthContext`. It does not itself decide
//! whether a request is authorized - that is `resource_engine_core::gate`'s
//! job, via `PermissionGate`/`PolicyGate`, re-exported here so a caller can
//! `use resource_engine_auth::prelude::*` and get both halves (identity
//! extraction and the gate it feeds) in one place.

mod claims;
mod jwt;

pub use claims::Claims;
pub use jwt::validate_token;
pub use resource_engine_core::gate::{AllowAll, AuthContext, PolicyGate};

/// JWT configuration for the auth adapter.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    /// Secret key for HS256.
    pub secret: Option<String>,
    /// Whether `secret` is base64-encoded.
    pub secret_is_base64: bool,
    /// Required audience claim, if any.
    pub audience: Option<String>,
    /// When `true`, a missing `Authorization` header yields an anonymous
    /// `AuthContext` instead of `JwtError::MissingHeader`.
    pub allow_anonymous: bool,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secret_is_base64: false,
            audience: None,
            allow_anonymous: true,
        }
    }
}

/// JWT validation error.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("missing authorization header")]
    MissingHeader,

    #[error("invalid authorization header format")]
    InvalidHeaderFormat,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid audience")]
    InvalidAudience,
}

/// Extract and validate a JWT from an `Authorization` header value,
/// producing the `AuthContext` the Permission Gate is invoked with.
pub fn authenticate(auth_header: Option<&str>, config: &JwtConfig) -> Result<AuthContext, JwtError> {
    let token = match auth_header {
        Some(header) => extract_bearer_token(header)?,
        None => {
            return if config.allow_anonymous {
                Ok(AuthContext::anonymous())
            } else {
                Err(JwtError::MissingHeader)
            };
        }
    };

    validate_token(token, config)
}

fn extract_bearer_token(header: &str) -> Result<&str, JwtError> {
    let header = header.trim();

    if let Some(token) = header.strip_prefix("Bearer ") {
        Ok(token.trim())
    } else if let Some(token) = header.strip_prefix("bearer ") {
        Ok(token.trim())
    } else {
        Err(JwtError::InvalidHeaderFormat)
    }
}

pub mod prelude {
    pub use super::{authenticate, AllowAll, AuthContext, JwtConfig, JwtError, PolicyGate};
}
