//! Error handling for the orchestrator
//!
//! Provides a unified error type and result alias used across all
//! orchestrator components.

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing required fields, zero-resource requests, unknown filters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Job, node, or allocation id does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Tenant quota would be violated
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// No healthy node can satisfy the request right now; internal, never
    /// surfaced to callers — it drives head-of-line blocking in the tick
    #[error("No suitable node: {0}")]
    NoSuitableNode(String),

    /// Queued-phase deadline elapsed before placement
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Admission policy denied the job
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Conflicting state, e.g. deregistering a node with live allocations
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A dependency (policy evaluator) is unreachable
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Allocator bookkeeping disagrees with itself; fatal for the current
    /// tick, never for the process
    #[error("Allocator invariant violated: {0}")]
    InvariantViolated(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a quota exceeded error
    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    /// Create a no suitable node error
    pub fn no_suitable_node(msg: impl Into<String>) -> Self {
        Self::NoSuitableNode(msg.into())
    }

    /// Create a deadline exceeded error
    pub fn deadline_exceeded(msg: impl Into<String>) -> Self {
        Self::DeadlineExceeded(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolated(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error is transient from the scheduler's point of view:
    /// the job stays queued and a later tick may succeed
    pub fn is_schedulable_again(&self) -> bool {
        matches!(self, Error::NoSuitableNode(_) | Error::QuotaExceeded(_))
    }

    /// Check if this error indicates a client-side problem
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_)
                | Error::NotFound(_)
                | Error::QuotaExceeded(_)
                | Error::PermissionDenied(_)
                | Error::Conflict(_)
        )
    }

    /// Get the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::NotFound(_) => "not_found",
            Error::QuotaExceeded(_) => "quota_exceeded",
            Error::NoSuitableNode(_) => "no_suitable_node",
            Error::DeadlineExceeded(_) => "deadline_exceeded",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Conflict(_) => "conflict",
            Error::Unavailable(_) => "unavailable",
            Error::InvariantViolated(_) => "invariant_violated",
            Error::InvalidConfiguration(_) => "configuration",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }

    /// Convert to an HTTP status code for the REST surface
    pub fn to_http_status(&self) -> u16 {
        match self {
            Error::InvalidRequest(_) | Error::InvalidConfiguration(_) => 400,
            Error::PermissionDenied(_) => 403,
            Error::NotFound(_) => 404,
            Error::DeadlineExceeded(_) => 408,
            Error::QuotaExceeded(_) | Error::Conflict(_) => 409,
            Error::Unavailable(_) => 503,
            _ => 500,
        }
    }
}
