use quay_core::error::HttpError;

/// Authentication failures raised by token extraction and validation.
#[derive(Debug)]
pub enum SecurityError {
    /// No token in the Authorization header or any configured source.
    MissingToken,

    /// The token is malformed or its signature does not verify.
    InvalidToken(String),

    /// The token's `exp` is in the past.
    TokenExpired,

    /// A claim check failed (issuer, audience, nbf).
    ValidationFailed(String),
}

impl std::fmt::Display for SecurityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityError::MissingToken => write!(f, "Missing authentication token"),
            SecurityError::InvalidToken(msg) => write!(f, "Invalid token: {msg}"),
            SecurityError::TokenExpired => write!(f, "Token expired"),
            SecurityError::ValidationFailed(msg) => write!(f, "Token validation failed: {msg}"),
        }
    }
}

impl std::error::Error for SecurityError {}

impl SecurityError {
    /// The stable client-facing message; internals stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            SecurityError::MissingToken => "Authentication token is required",
            SecurityError::TokenExpired => "Authentication token has expired",
            SecurityError::InvalidToken(_) | SecurityError::ValidationFailed(_) => {
                "Invalid authentication token"
            }
        }
    }
}

impl From<SecurityError> for HttpError {
    fn from(err: SecurityError) -> Self {
        HttpError::Unauthorized(err.public_message().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn public_messages_are_specific() {
        assert_eq!(
            SecurityError::MissingToken.public_message(),
            "Authentication token is required"
        );
        assert_eq!(
            SecurityError::TokenExpired.public_message(),
            "Authentication token has expired"
        );
        assert_eq!(
            SecurityError::InvalidToken("sig".into()).public_message(),
            "Invalid authentication token"
        );
    }

    #[tokio::test]
    async fn maps_to_unauthorized() {
        let err: HttpError = SecurityError::TokenExpired.into();
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
