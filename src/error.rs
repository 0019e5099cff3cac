//! Error types for channel-ingest
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Job, Source, Database, Config)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for channel-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for channel-ingest
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "proxy.proxies")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Remote message source error
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Job lifecycle error
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Object storage upload failed
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// The running job was cancelled (user pause or shutdown)
    #[error("job cancelled")]
    Cancelled,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Tagged failure kinds reported by a [`SourceClient`](crate::source::SourceClient)
///
/// The engine switches on these kinds; it never inspects message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The provider asked us to back off before issuing further requests
    #[error("rate limited: {retry_after_secs}s")]
    RateLimited {
        /// Mandatory wait reported by the provider
        retry_after_secs: u64,
    },

    /// Access to the channel was revoked or never granted
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The channel or item does not exist
    #[error("source not found: {0}")]
    NotFound(String),

    /// Connection-level failure (timeout, reset, unreachable proxy)
    #[error("network failure: {0}")]
    Network(String),

    /// The provider returned something we could not interpret
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Job lifecycle errors
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found in the store
    #[error("job {id} not found")]
    NotFound {
        /// The job ID that was not found
        id: String,
    },

    /// The job already has an active worker
    #[error("job {id} is already running")]
    AlreadyRunning {
        /// The job ID that is already running
        id: String,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidState {
        /// The job ID that is in an invalid state for the operation
        id: String,
        /// The operation that was attempted (e.g., "update", "run")
        operation: String,
        /// The current state that prevents the operation (e.g., "completed")
        current_state: String,
    },
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "job_not_found",
///     "message": "job error: job news_1700000000000 not found",
///     "details": {
///       "job_id": "news_1700000000000"
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    /// Create a "service unavailable" error
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("service_unavailable", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,

            Error::NotFound(_) => 404,
            Error::Job(JobError::NotFound { .. }) => 404,
            Error::Source(SourceError::NotFound(_)) => 404,

            Error::Source(SourceError::AccessDenied(_)) => 403,

            Error::Job(JobError::AlreadyRunning { .. }) => 409,
            Error::Job(JobError::InvalidState { .. }) => 409,
            Error::Cancelled => 409,

            Error::Source(SourceError::RateLimited { .. }) => 429,

            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Storage(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - upstream failures
            Error::Source(SourceError::Network(_)) => 502,
            Error::Source(SourceError::Protocol(_)) => 502,
            Error::Network(_) => 502,

            Error::ShuttingDown => 503,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Source(e) => match e {
                SourceError::RateLimited { .. } => "rate_limited",
                SourceError::AccessDenied(_) => "access_denied",
                SourceError::NotFound(_) => "source_not_found",
                SourceError::Network(_) => "source_network_error",
                SourceError::Protocol(_) => "source_protocol_error",
            },
            Error::Job(e) => match e {
                JobError::NotFound { .. } => "job_not_found",
                JobError::AlreadyRunning { .. } => "already_running",
                JobError::InvalidState { .. } => "invalid_state",
            },
            Error::Storage(_) => "storage_error",
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Cancelled => "cancelled",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Job(JobError::NotFound { id }) | Error::Job(JobError::AlreadyRunning { id }) => {
                Some(serde_json::json!({
                    "job_id": id,
                }))
            }
            Error::Job(JobError::InvalidState {
                id,
                operation,
                current_state,
            }) => Some(serde_json::json!({
                "job_id": id,
                "operation": operation,
                "current_state": current_state,
            })),
            Error::Source(SourceError::RateLimited { retry_after_secs }) => {
                Some(serde_json::json!({
                    "retry_after_secs": retry_after_secs,
                }))
            }
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
