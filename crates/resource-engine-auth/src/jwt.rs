//! JWT token validation, producing the engine's `AuthContext`.

use crate::claims::Claims;
use crate::{JwtConfig, JwtError};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use resource_engine_core::gate::AuthContext;

/// Validate a JWT token and map its claims into an `AuthContext`.
pub fn validate_token(token: &str, config: &JwtConfig) -> Result<AuthContext, JwtError> {
    let secret = config
        .secret
        .as_ref()
        .ok_or_else(|| JwtError::InvalidToken("no JWT secret configured".into()))?;

    let key_bytes = if config.secret_is_base64 {
        base64_decode(secret)?
    } else {
        secret.as_bytes().to_vec()
    };
    let key = DecodingKey::from_secret(&key_bytes);

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.validate_nbf = true;
    if let Some(aud) = &config.audience {
        validation.set_audience(&[aud]);
    } else {
        validation.validate_aud = false;
    }

    let token_data =
        decode::<Claims>(token, &key, &validation).map_err(map_jwt_error)?;
    let claims = token_data.claims;
    let subject = claims.sub.clone();

    Ok(AuthContext {
        subject,
        claims: claims.into_map(),
    })
}

fn base64_decode(s: &str) -> Result<Vec<u8>, JwtError> {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD
        .decode(s)
        .map_err(|e| JwtError::InvalidToken(format!("invalid base64 secret: {}", e)))
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> JwtError {
    use jsonwebtoken::errors::ErrorKind;

    match e.kind() {
        ErrorKind::ExpiredSignature => JwtError::Expired,
        ErrorKind::ImmatureSignature => JwtError::NotYetValid,
        ErrorKind::InvalidSignature => JwtError::InvalidSignature,
        ErrorKind::InvalidAudience => JwtError::InvalidAudience,
        _ => JwtError::InvalidToken(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::collections::HashMap;

    fn make_token(claims: &Claims, secret: &str) -> String {
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&Header::default(), claims, &key).unwrap()
    }

    #[test]
    fn test_validate_valid_token() {
        let secret = "test_secret_key_at_least_32_bytes!";

        let mut extra = HashMap::new();
        extra.insert("role".into(), serde_json::Value::String("editor".into()));
        let claims = Claims {
            sub: Some("user123".into()),
            iss: None,
            exp: Some(chrono::Utc::now().timestamp() + 3600),
            nbf: None,
            iat: None,
            aud: None,
            extra,
        };

        let token = make_token(&claims, secret);
        let config = JwtConfig {
            secret: Some(secret.into()),
            ..Default::default()
        };

        let auth = validate_token(&token, &config).unwrap();
        assert_eq!(auth.subject.as_deref(), Some("user123"));
        assert_eq!(auth.claim("role").unwrap(), "editor");
    }

    #[test]
    fn test_validate_expired_token() {
        let secret = "test_secret_key_at_least_32_bytes!";

        let claims = Claims {
            sub: None,
            iss: None,
            exp: Some(chrono::Utc::now().timestamp() - 3600),
            nbf: None,
            iat: None,
            aud: None,
            extra: HashMap::new(),
        };

        let token = make_token(&claims, secret);
        let config = JwtConfig {
            secret: Some(secret.into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(JwtError::Expired)));
    }

    #[test]
    fn test_validate_wrong_audience_rejected() {
        let secret = "test_secret_key_at_least_32_bytes!";
        let claims = Claims {
            sub: Some("u1".into()),
            iss: None,
            exp: Some(chrono::Utc::now().timestamp() + 3600),
            nbf: None,
            iat: None,
            aud: Some("other-service".into()),
            extra: HashMap::new(),
        };
        let token = make_token(&claims, secret);
        let config = JwtConfig {
            secret: Some(secret.into()),
            audience: Some("this-service".into()),
            ..Default::default()
        };

        let result = validate_token(&token, &config);
        assert!(matches!(result, Err(JwtError::InvalidAudience)));
    }
}
