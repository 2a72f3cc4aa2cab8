/// Pool-level failures surfaced to callers.
#[derive(Debug)]
pub enum PoolError {
    /// No connection became available within the acquire timeout.
    AcquireTimeout,
    /// The pool is shut down and rejects new acquires.
    Closed,
    /// The underlying driver failed after the one-retry policy.
    Driver(String),
    /// The descriptor names a driver kind this build cannot serve.
    UnsupportedDriver(String),
    /// No pool registered under that name.
    UnknownPool(String),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::AcquireTimeout => write!(f, "Timed out waiting for a pooled connection"),
            PoolError::Closed => write!(f, "Pool is closed"),
            PoolError::Driver(msg) => write!(f, "Driver error: {msg}"),
            PoolError::UnsupportedDriver(kind) => write!(f, "Unsupported driver kind: {kind}"),
            PoolError::UnknownPool(name) => write!(f, "Unknown pool: {name}"),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<PoolError> for quay_core::error::HttpError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AcquireTimeout => {
                quay_core::error::HttpError::ServiceUnavailable("Database busy.".to_string())
            }
            other => quay_core::error::HttpError::Internal(other.to_string()),
        }
    }
}
