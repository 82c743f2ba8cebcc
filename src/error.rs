//! Error types for filewire.

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Main error type for all filewire operations.
#[derive(Debug, Error)]
pub enum FilewireError {
    /// I/O error during transport or host filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (hello handshake only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (invalid frame, reserved bits, bad payload, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error reported by the remote peer in an error response frame.
    #[error("Remote error ({code:?}): {message}")]
    Remote {
        /// Wire-level error code from the response payload.
        code: ErrorCode,
        /// Human-readable message from the peer.
        message: String,
    },

    /// Handshake failed (version mismatch or rejected parameters).
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response arrived within the configured reply timeout.
    #[error("Reply timeout")]
    ReplyTimeout,
}

/// Result type alias using FilewireError.
pub type Result<T> = std::result::Result<T, FilewireError>;
