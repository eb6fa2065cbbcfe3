//! Error types for device sessions.

use thiserror::Error;

/// Errors raised while talking to a single device.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device unreachable at the TCP level
    #[error("Cannot connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// SSH authentication rejected
    #[error("Authentication failed for {user}@{address}: {reason}")]
    Auth {
        address: String,
        user: String,
        reason: String,
    },

    /// SSH transport errors
    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Channel I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// NETCONF message framing broken or hello missing
    #[error("NETCONF framing error: {0}")]
    Framing(String),

    /// Device answered with an `<rpc-error>`
    #[error("RPC error: {message}")]
    Rpc { message: String },

    /// Device answered with a different reply element than the operation
    /// normally produces
    #[error("expected element type <{expected}> but have <{found}>")]
    UnexpectedEnvelope { expected: String, found: String },

    /// Operational output was not valid JSON
    #[error("Malformed JSON reply: {0}")]
    Json(#[from] serde_json::Error),

    /// No reply within the session timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;
