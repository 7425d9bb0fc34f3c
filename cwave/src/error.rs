//! Error type shared by every layer of the client.

use thiserror::Error;

/// Errors that can occur while talking to a C-WAVE.
///
/// Every error is returned to the immediate caller. Nothing in this crate
/// retries a failed exchange or swallows an error.
#[derive(Error, Debug)]
pub enum CwaveError {
    /// An exchange was attempted while the connection is closed.
    #[error("Not connected to device")]
    NotConnected,

    /// TCP connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer did not identify itself as a C-WAVE.
    ///
    /// The connection has already been closed when this is returned.
    #[error("Invalid device signature: {signature:?}")]
    IdentityMismatch {
        /// Whatever the peer answered to `info?`
        signature: String,
    },

    /// No line terminator arrived within the response timeout.
    #[error("Timeout waiting for response to {command:?}")]
    Timeout {
        /// Command that was waiting for a reply
        command: String,
    },

    /// A polled condition was not reached in time.
    #[error("Condition not reached within {0:?}")]
    WaitTimeout(std::time::Duration),

    /// The device answered with an error line (leading `?`).
    ///
    /// Carries the command that was submitted, not the reply text.
    #[error("Command failed: {command}")]
    CommandFailed {
        /// Command as it was sent, without terminator
        command: String,
    },

    /// Reply payload does not have the expected shape.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Client-side argument check failed; nothing was sent.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Payload could not be parsed as the requested type.
    #[error("Cannot decode {payload:?} as {target}")]
    DecodeError {
        /// Raw payload text
        payload: String,
        /// Name of the requested type
        target: &'static str,
    },

    /// Low-level socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for C-WAVE operations.
pub type CwaveResult<T> = Result<T, CwaveError>;

impl CwaveError {
    pub(crate) fn decode(payload: &str, target: &'static str) -> Self {
        CwaveError::DecodeError {
            payload: payload.to_string(),
            target,
        }
    }
}
