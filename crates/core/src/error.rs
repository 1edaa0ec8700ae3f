//! Error taxonomy shared across the workspace.
//!
//! Each failure class has its own propagation policy:
//! - [`FetchError`]: one exchange resource failed; the cycle continues with
//!   an empty result for it.
//! - [`StorageError`]: transient failures are retried, fatal ones abort the
//!   remaining storage work of the cycle.
//! - [`DeliveryError`]: a notification sink failed; logged, never fatal.

use thiserror::Error;

/// Failure fetching one resource from an exchange.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded its timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Non-success HTTP status.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Response body or reason.
        message: String,
    },

    /// HTTP 200 with an exchange-level error code in the body.
    #[error("exchange error {code}: {message}")]
    Exchange {
        /// Exchange-specific error code.
        code: String,
        /// Error message from the exchange.
        message: String,
    },

    /// Credentials missing or rejected.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// No adapter is registered for the exchange identifier.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),

    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates an exchange-level error from a body error code.
    pub fn exchange(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exchange {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable tag for error logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Api { .. } => "api",
            Self::Exchange { .. } => "exchange",
            Self::Authentication(_) => "authentication",
            Self::UnsupportedExchange(_) => "unsupported_exchange",
            Self::Decode(_) => "decode",
        }
    }
}

/// Failure talking to the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection reset, protocol EOF, pool exhaustion, or a must-roll-back
    /// transaction state. Worth retrying on a fresh session.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Anything else: constraint violations, bad SQL, decode failures.
    #[error("storage error: {0}")]
    Fatal(String),

    /// A transient error persisted through every retry.
    #[error("storage retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Message of the final failure.
        last: String,
    },
}

impl StorageError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true if the operation may succeed on a fresh session.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Failure delivering a notification to a sink.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Sink answered with a status other than 200.
    #[error("sink returned HTTP {0}")]
    HttpStatus(u16),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded its timeout.
    #[error("delivery timeout: {0}")]
    Timeout(String),

    /// Sink has no usable configuration for this instance.
    #[error("sink not configured: {0}")]
    NotConfigured(String),

    /// Sink accepted the request but refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_storage_errors_retry() {
        assert!(StorageError::transient("connection reset").is_transient());
        assert!(!StorageError::fatal("unique violation").is_transient());
        assert!(!StorageError::Exhausted {
            attempts: 3,
            last: "eof".into()
        }
        .is_transient());
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::api(503, "maintenance");
        assert_eq!(err.to_string(), "API error: 503 - maintenance");
        assert_eq!(err.kind(), "api");
        assert_eq!(FetchError::exchange("40037", "bad key").kind(), "exchange");
    }
}
