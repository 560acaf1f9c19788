//! Gateway Error Types
//!
//! Unified error handling for the request pipeline. Every error kind
//! carries an HTTP-equivalent status code so the adapter can shape a
//! response envelope without inspecting message text.

use thiserror::Error;

/// Result type for gateway operations
pub type AppResult<T> = Result<T, ApplicationError>;

/// Application errors raised anywhere in the request pipeline
#[derive(Debug, Clone, Error)]
pub enum ApplicationError {
    /// Malformed input: unknown operator, invalid sort, bad batch structure,
    /// unresolvable reference
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Claims missing where required
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Permission check failed: no matching role, property outside the
    /// allow-list, or an empty projection after filtering
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Update/delete affected zero rows without a concurrency mismatch
    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrency-control value did not match the stored row
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed API model at load time
    #[error("Invalid API specification: {0}")]
    Spec(String),

    /// Driver or unexpected failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApplicationError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn spec(msg: impl Into<String>) -> Self {
        Self::Spec(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code for the response envelope
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Spec(_) => 500,
            Self::Internal(_) => 500,
        }
    }

    /// Stable error code for structured logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Spec(_) => "SPEC_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Spec(m)
            | Self::Internal(m) => m,
        }
    }

    /// Whether this error is safe to surface verbatim to the client.
    /// Internal and spec errors are replaced with a generic message.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

impl From<serde_json::Error> for ApplicationError {
    fn from(e: serde_json::Error) -> Self {
        Self::BadRequest(format!("invalid JSON: {}", e))
    }
}

impl From<regex::Error> for ApplicationError {
    fn from(e: regex::Error) -> Self {
        Self::Spec(format!("invalid permission pattern: {}", e))
    }
}
