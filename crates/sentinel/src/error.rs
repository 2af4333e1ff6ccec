//! Error types for the sentinel service.

use axum::http::StatusCode;
use thiserror::Error;

/// Error taxonomy for issue processing and the HTTP API.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Issue #{issue_number} is already being processed")]
    StateConflict { issue_number: u64 },

    #[error("GitHub API rate limit exceeded")]
    RateLimited,

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("AI service failed: {reason}")]
    AiService { reason: String },

    #[error("Git operation '{operation}' failed: {reason}")]
    GitOperation { operation: String, reason: String },

    #[error("GitHub API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JWT signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl SentinelError {
    /// HTTP status to report when the error surfaces through an API handler.
    ///
    /// Background processing never maps errors to HTTP; failures there are
    /// reported as issue comments after the webhook has been acknowledged.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidSignature | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::StateConflict { .. } => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Shorthand for a git failure carrying the failing subcommand.
    pub fn git(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::GitOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for sentinel operations.
pub type SentinelResult<T> = Result<T, SentinelError>;
