//! Error types surfaced by the client and its transport.

use reqwest::StatusCode;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by the LogTide client.
#[derive(Debug, Error)]
pub enum LogTideError {
    /// The buffer is at `max_buffer_size`; the entry was not enqueued.
    #[error("Log buffer is full")]
    BufferFull,

    /// The circuit breaker is open; the transport was not called.
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// A single transport attempt failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Every attempt for a batch failed.
    #[error("All {attempts} send attempts exhausted. Last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The client has been closed and no longer accepts entries.
    #[error("Client has been closed")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors produced by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Server returned a non-success status code
    #[error("Server error ({code}): {message}")]
    Status { code: StatusCode, message: String },

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Failed to decode a response body
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// HTTP client could not be built
    #[error("Transport configuration error: {0}")]
    Build(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Request(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(LogTideError::BufferFull.to_string(), "Log buffer is full");
        assert_eq!(
            LogTideError::CircuitOpen.to_string(),
            "Circuit breaker is open"
        );

        let err = LogTideError::RetriesExhausted {
            attempts: 3,
            last_error: "Connection refused".to_string(),
        };
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("Connection refused"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Status {
            code: StatusCode::BAD_REQUEST,
            message: "Invalid JSON".to_string(),
        };
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("Invalid JSON"));

        let wrapped: LogTideError = TransportError::Timeout.into();
        assert_eq!(wrapped.to_string(), "Request timed out");
    }
}
