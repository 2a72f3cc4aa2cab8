//! JWT claims validation against a shared HS256 secret.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tracing::{debug, warn};

use quay_core::config::JwtSettings;

use crate::error::SecurityError;

/// Validates bearer tokens and returns their raw claims.
///
/// Signature, `exp`, `nbf` (when present), and issuer (when configured) are
/// checked by the JWT library. The audience claim is compared manually:
/// case-insensitively, accepting either a scalar or an array containing the
/// expected value.
pub struct TokenValidator {
    decoding_key: DecodingKey,
    validation: Validation,
    audience: Option<String>,
}

impl TokenValidator {
    pub fn from_settings(settings: &JwtSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        if let Some(issuer) = &settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            decoding_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            validation,
            audience: settings.audience.clone(),
        }
    }

    /// Validate `token` and return its claims.
    pub fn validate(&self, token: &str) -> Result<serde_json::Value, SecurityError> {
        let data = decode::<serde_json::Value>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                let err = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        SecurityError::TokenExpired
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                        SecurityError::ValidationFailed("invalid issuer".to_string())
                    }
                    jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                        SecurityError::ValidationFailed("token not yet valid".to_string())
                    }
                    _ => SecurityError::InvalidToken(e.to_string()),
                };
                warn!(error = %err, "JWT validation failed");
                err
            })?;

        if let Some(expected) = &self.audience {
            if !audience_matches(&data.claims, expected) {
                warn!("JWT audience mismatch");
                return Err(SecurityError::ValidationFailed("invalid audience".to_string()));
            }
        }

        debug!(
            sub = data.claims.get("sub").and_then(|v| v.as_str()).unwrap_or("unknown"),
            "JWT validated"
        );
        Ok(data.claims)
    }
}

fn audience_matches(claims: &serde_json::Value, expected: &str) -> bool {
    match claims.get("aud") {
        Some(serde_json::Value::String(aud)) => aud.eq_ignore_ascii_case(expected),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .any(|aud| aud.eq_ignore_ascii_case(expected)),
        _ => false,
    }
}
