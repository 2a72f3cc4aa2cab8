use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

/// JSON body for framework-generated failures: `{"success":false,"message":…}`.
fn framework_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "success": false, "message": message.into() });
    (status, Json(body)).into_response()
}

/// JSON body for auth/security failures: `{"error":…}`.
fn security_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

/// Request-scoped error surfaced by stages and handlers.
///
/// The variant determines both the status code and the JSON body shape:
/// routing and handler failures use `{"success":false,"message":…}`, while
/// auth, CSRF, and rate-limit rejections use `{"error":…}`.
pub enum HttpError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    /// A required backing resource (e.g. a pooled DB connection) could not
    /// be obtained in time.
    ServiceUnavailable(String),
    Unauthorized(String),
    Forbidden(String),
    TooManyRequests {
        message: String,
        retry_after_secs: u64,
    },
}

impl HttpError {
    /// The canonical 404 for a request no route claimed.
    pub fn endpoint_not_found() -> Self {
        HttpError::NotFound("Endpoint not found.".to_string())
    }

    /// The canonical 400 for a path parameter that failed typed conversion.
    pub fn invalid_route_parameter() -> Self {
        HttpError::BadRequest("Invalid route parameter format.".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_) => StatusCode::BAD_REQUEST,
            HttpError::NotFound(_) => StatusCode::NOT_FOUND,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            HttpError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            HttpError::Forbidden(_) => StatusCode::FORBIDDEN,
            HttpError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::BadRequest(msg) => framework_response(StatusCode::BAD_REQUEST, msg),
            HttpError::NotFound(msg) => framework_response(StatusCode::NOT_FOUND, msg),
            HttpError::Internal(msg) => framework_response(StatusCode::INTERNAL_SERVER_ERROR, msg),
            HttpError::ServiceUnavailable(msg) => {
                framework_response(StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            HttpError::Unauthorized(msg) => security_response(StatusCode::UNAUTHORIZED, msg),
            HttpError::Forbidden(msg) => security_response(StatusCode::FORBIDDEN, msg),
            HttpError::TooManyRequests {
                message,
                retry_after_secs,
            } => {
                let mut response = security_response(StatusCode::TOO_MANY_REQUESTS, message);
                if let Ok(value) = retry_after_secs.to_string().parse() {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
        }
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            HttpError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            HttpError::Internal(msg) => write!(f, "Internal Error: {msg}"),
            HttpError::ServiceUnavailable(msg) => write!(f, "Service Unavailable: {msg}"),
            HttpError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            HttpError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            HttpError::TooManyRequests { message, .. } => {
                write!(f, "Too Many Requests: {message}")
            }
        }
    }
}

impl std::fmt::Debug for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for HttpError {}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        HttpError::Internal(err.to_string())
    }
}

/// Failure to bring the listener up: bind, TLS material, or lifecycle misuse.
///
/// Distinct from [`crate::config::ConfigError`] so the binary can map the two
/// to their respective exit codes.
#[derive(Debug)]
pub enum StartError {
    /// Binding the TCP listener failed.
    Bind(String),
    /// TLS certificate or key material is missing, empty, or unparsable.
    Tls(String),
    /// The lifecycle was driven out of order (e.g. start while running).
    InvalidState(String),
    /// Writing the PID file failed.
    PidFile(String),
}

impl std::fmt::Display for StartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartError::Bind(msg) => write!(f, "Listener bind failed: {msg}"),
            StartError::Tls(msg) => write!(f, "TLS setup failed: {msg}"),
            StartError::InvalidState(msg) => write!(f, "Invalid server state: {msg}"),
            StartError::PidFile(msg) => write!(f, "PID file error: {msg}"),
        }
    }
}

impl std::error::Error for StartError {}
