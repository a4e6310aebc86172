//! Completion errors and which of them are worth retrying.

use std::time::Duration;

use thiserror::Error;

/// Longest single backoff between completion attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP 429. `retry_after` comes from the `Retry-After` header.
    #[error("rate limited (HTTP 429): {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Bad request, bad key, unknown model. Never retried.
    #[error("client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    /// The body was not a chat completion.
    #[error("malformed completion: {0}")]
    Malformed(String),
}

impl LlmError {
    /// Map a non-success status and its body.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = body.to_string();
        match status {
            429 => LlmError::RateLimited {
                message,
                retry_after,
            },
            400..=499 => LlmError::Client { status, message },
            _ => LlmError::Server { status, message },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            LlmError::RateLimited { .. } => Some(429),
            LlmError::Server { status, .. } | LlmError::Client { status, .. } => Some(*status),
            LlmError::Network(_) | LlmError::Malformed(_) => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Server { .. } | LlmError::Network(_)
        )
    }

    /// Delay before retry `attempt` (0-based): `Retry-After` when given,
    /// otherwise a doubling base (5s for 429, 2s for 5xx, 1s otherwise).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = match self {
            LlmError::RateLimited {
                retry_after: Some(delay),
                ..
            } => return *delay,
            LlmError::RateLimited { .. } => Duration::from_secs(5),
            LlmError::Server { .. } => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        };
        base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
    }
}

/// How hard the client retries transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Total wall time budget across retries
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_retry_duration: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            max_retry_duration: Duration::ZERO,
        }
    }

    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}
