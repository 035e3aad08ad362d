//! Error taxonomy for the router.
//!
//! `ErrorKind` is the wire/response-facing classification carried on every
//! failed [`crate::response::Response`] — it drives retry and circuit-breaker
//! decisions and is what callers actually branch on. `RouterError` is the
//! internal `std::error::Error` type adapters and the service use before an
//! error is folded into a `Response`.

use serde::{Deserialize, Serialize};

/// Classification of a failure, independent of which adapter produced it.
///
/// This is deliberately a plain enum (not `thiserror`) since it is meant to
/// travel as response metadata and be matched on by callers, not printed as
/// a human-readable error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NoBackend,
    Disabled,
    BudgetExceeded,
    CircuitOpen,
    RateLimit,
    Auth,
    BadRequest,
    ServerError,
    Timeout,
    Network,
    Deserialization,
    Cancelled,
    Unsupported,
    Unknown,
}

impl ErrorKind {
    /// Whether the Service should retry the same backend (or move to the
    /// next one under Failover) after seeing this error.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::ServerError | ErrorKind::RateLimit
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NoBackend => "no_backend",
            ErrorKind::Disabled => "disabled",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Deserialization => "deserialization",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Internal error type used by adapters and the service. Never crosses the
/// Adapter boundary as a `Result::Err` to application code — adapters catch
/// it and lower it into a `Response { success: false, .. }` themselves
/// (see `RouterError::into_failure_fields`).
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no backend available for this request")]
    NoBackend,

    #[error("backend is disabled")]
    Disabled,

    #[error("backend budget exceeded")]
    BudgetExceeded,

    #[error("circuit open for backend")]
    CircuitOpen,

    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upstream server error: {0}")]
    ServerError(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to deserialize response: {0}")]
    Deserialization(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("operation not supported by this adapter: {0}")]
    Unsupported(String),

    #[error("internal error: {0}")]
    Internal(String),

    /// Escape hatch for plugin construction failures, which may originate
    /// from arbitrary third-party code.
    #[error(transparent)]
    Plugin(#[from] anyhow::Error),
}

impl RouterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::NoBackend => ErrorKind::NoBackend,
            RouterError::Disabled => ErrorKind::Disabled,
            RouterError::BudgetExceeded => ErrorKind::BudgetExceeded,
            RouterError::CircuitOpen => ErrorKind::CircuitOpen,
            RouterError::RateLimit(_) => ErrorKind::RateLimit,
            RouterError::Auth(_) => ErrorKind::Auth,
            RouterError::BadRequest(_) => ErrorKind::BadRequest,
            RouterError::ServerError(_) => ErrorKind::ServerError,
            RouterError::Timeout => ErrorKind::Timeout,
            RouterError::Network(_) => ErrorKind::Network,
            RouterError::Deserialization(_) => ErrorKind::Deserialization,
            RouterError::Cancelled => ErrorKind::Cancelled,
            RouterError::Unsupported(_) => ErrorKind::Unsupported,
            RouterError::Internal(_) | RouterError::Plugin(_) => ErrorKind::Unknown,
        }
    }

    /// Map an HTTP status code to the right error variant, given a best-effort
    /// extracted message. Transport errors (dial/TLS) never reach this; they're
    /// constructed directly as `RouterError::Network`/`Timeout`.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => RouterError::Auth(message),
            429 => RouterError::RateLimit(message),
            400..=499 => RouterError::BadRequest(message),
            500..=599 => RouterError::ServerError(message),
            _ => RouterError::Internal(message),
        }
    }
}

impl From<reqwest::Error> for RouterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RouterError::Timeout
        } else {
            RouterError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(ErrorKind::RateLimit.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::BadRequest.is_retryable());
        assert!(!ErrorKind::BudgetExceeded.is_retryable());
        assert!(!ErrorKind::CircuitOpen.is_retryable());
        assert!(!ErrorKind::Disabled.is_retryable());
        assert!(!ErrorKind::Deserialization.is_retryable());
    }

    #[test]
    fn status_mapping() {
        assert_eq!(RouterError::from_status(401, "x").kind(), ErrorKind::Auth);
        assert_eq!(RouterError::from_status(403, "x").kind(), ErrorKind::Auth);
        assert_eq!(RouterError::from_status(429, "x").kind(), ErrorKind::RateLimit);
        assert_eq!(RouterError::from_status(404, "x").kind(), ErrorKind::BadRequest);
        assert_eq!(RouterError::from_status(500, "x").kind(), ErrorKind::ServerError);
        assert_eq!(RouterError::from_status(503, "x").kind(), ErrorKind::ServerError);
    }
}
