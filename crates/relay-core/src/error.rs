//! Error types for the integration runtime.

use relay_proto::{ApiError, ProviderId};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the runtime and the bridges built on it.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Missing or malformed configuration, reported at construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// A request path or base URL could not be turned into a URL.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the call could proceed.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The circuit breaker for this provider/subject is open.
    #[error("circuit open for {provider} (subject {subject:?}); retry in {retry_in:?}")]
    CircuitOpen {
        provider: ProviderId,
        subject: String,
        retry_in: Duration,
    },

    /// A provider rejected the call, or the call never reached it.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Token provider could not produce a credential.
    #[error("auth error: {0}")]
    Auth(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RelayError {
    /// The underlying provider error, when there is one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(err) => Some(err),
            _ => None,
        }
    }

    /// True for errors raised by the caller's own clock or token.
    pub fn is_caller_context(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
