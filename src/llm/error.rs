//! Chat client error types

use std::time::Duration;
use thiserror::Error;

/// Transport-level failure talking to the chat model, with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Classify a non-success HTTP status returned by the model API
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            400 => Self::invalid_request(format!("Invalid request: {message}")),
            401 | 403 => Self::auth(format!("Authentication failed: {message}")),
            429 => Self::rate_limit(format!("Rate limit exceeded: {message}")),
            500..=599 => Self::server_error(format!("Server error: {message}")),
            _ => Self::unknown(format!("HTTP {status}: {message}")),
        }
    }
}

/// Error classification, used for user notices and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Network issues, timeouts
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Bad request (400), including blocked prompts
    InvalidRequest,
    /// Unknown error
    Unknown,
}

impl LlmErrorKind {
    /// Whether resubmitting the same input has a reasonable chance to succeed
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}
