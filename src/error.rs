//! Error taxonomy for the Observer Core.

use thiserror::Error;

/// Top-level error returned by Ingest/Store and Query API operations.
#[derive(Error, Debug, Clone)]
pub enum ObserverError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("runtime unavailable: {0}")]
    RuntimeUnavailable(#[from] RuntimeUnavailableError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ObserverError {
    /// Stable error code surfaced in `{error: {code, message}}` HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ObserverError::Validation(_) => "VALIDATION_ERROR",
            ObserverError::Auth(_) => "AUTH_ERROR",
            ObserverError::NotFound(_) => "NOT_FOUND",
            ObserverError::Persistence(_) => "PERSISTENCE_ERROR",
            ObserverError::RuntimeUnavailable(_) => "RUNTIME_UNAVAILABLE",
            ObserverError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            ObserverError::Validation(_) => 400,
            ObserverError::Auth(AuthError::InvalidToken) => 401,
            ObserverError::Auth(AuthError::OriginNotAllowed(_)) => 403,
            ObserverError::NotFound(_) => 404,
            ObserverError::Persistence(_) => 500,
            ObserverError::RuntimeUnavailable(_) => 502,
            ObserverError::Internal(_) => 500,
        }
    }
}

/// Bad request shape, bad cursor, out-of-range parameters.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Missing/invalid bearer token or disallowed Origin.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("missing or invalid bearer token")]
    InvalidToken,

    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),
}

/// Task id unknown to both the runtime and the ring-derived view.
#[derive(Error, Debug, Clone)]
pub enum NotFoundError {
    #[error("task not found: {0}")]
    Task(String),

    #[error("record not found: seq {0}")]
    Record(u64),
}

/// Async persistence failures. Sets `degraded`; never surfaces to producers.
#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    #[error("failed to append to {stream} stream: {reason}")]
    AppendFailed { stream: String, reason: String },

    #[error("failed to rotate {stream} stream: {reason}")]
    RotationFailed { stream: String, reason: String },

    #[error("failed to write metrics snapshot: {0}")]
    MetricsWriteFailed(String),
}

/// The runtime controller is missing or returned an error.
#[derive(Error, Debug, Clone)]
pub enum RuntimeUnavailableError {
    #[error("no runtime controller configured")]
    NotConfigured,

    #[error("runtime controller call failed: {0}")]
    CallFailed(String),

    #[error("runtime controller call timed out")]
    Timeout,
}

pub type ObserverResult<T> = Result<T, ObserverError>;
