//! Error types for outbound provider calls.
//!
//! Storage and CLI code propagate `anyhow::Error`. Provider calls need a
//! closed set of outcomes because the orchestrator picks the HTTP status and
//! apology text from them, so they return [`ProviderError`].

use reqwest::StatusCode;
use thiserror::Error;

/// Body fragments that mark a non-429 response as rate limiting.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "resource_exhausted",
    "quota exceeded",
    "exceeded your current quota",
];

/// Failure of one call to an embedding or chat endpoint.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited: {body}")]
    RateLimited { body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("operation not supported by {0}")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Classify a non-success response.
    pub fn classify(status: StatusCode, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        let limited = status == StatusCode::TOO_MANY_REQUESTS
            || RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m));
        if limited {
            ProviderError::RateLimited {
                body: body.to_string(),
            }
        } else {
            ProviderError::Status {
                status: status.as_u16(),
                body: body.to_string(),
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Transport(_) => ErrorKind::Transport,
            ProviderError::Status { .. } | ProviderError::Unsupported(_) => ErrorKind::Provider,
            ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
            ProviderError::Malformed(_) => ErrorKind::MalformedResponse,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Failure categories of the chat pipeline, used in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigMissing,
    Transport,
    Provider,
    RateLimited,
    MalformedResponse,
    LoggingFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConfigMissing => "config_missing",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Provider => "provider_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::LoggingFailure => "logging_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
