/// Errors raised by the device cache.
///
/// # Examples
///
/// ```rust
/// use snmpboost_storage::error::StoreError;
///
/// let err = StoreError::Corrupt {
///     key: "snmpboost:device:router-1".to_string(),
///     reason: "expected value at line 1 column 1".to_string(),
/// };
/// assert!(err.to_string().contains("router-1"));
/// assert!(!err.is_unreachable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record the caller relies on is missing.
    #[error("Store: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// A stored record could not be decoded.
    #[error("Store: corrupt record at '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Store: Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend cannot be reached at all.
    #[error("Store: backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Connectivity loss, as opposed to a bad or missing record.
    pub fn is_unreachable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Redis(e) => {
                e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
            }
            _ => false,
        }
    }
}

/// Convenience `Result` alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
