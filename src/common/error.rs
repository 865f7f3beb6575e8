//! # Client Error Types
//!
//! Every registration or write either completes or fails with one
//! [`ClientError`]. A failure aborts that single operation only; the
//! dispatcher reports it and keeps reading commands.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;

/// Errors raised by the protocol orchestrator and its transport.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Dialing, DNS resolution or the TLS handshake failed.
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// The stream ended before the requested number of bytes arrived.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    /// The transport stopped accepting bytes before the message was written.
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    /// A connect, read or write exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// The OS random source could not produce bytes.
    #[error("secure randomness unavailable: {0}")]
    Entropy(String),

    /// Authenticated encryption of an outgoing share failed.
    #[error("sealing failed")]
    Seal,

    /// An envelope failed authentication or was malformed.
    #[error("envelope could not be opened: {0}")]
    Open(&'static str),

    /// The secret-sharing engine rejected its inputs.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// The leader answered with a malformed reply or a failure status.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported a nonzero completion status for a write.
    #[error("write rejected by leader with status {0}")]
    WriteRejected(u32),

    /// No mailbox is registered under this local index.
    #[error("no mailbox registered with local index {0}")]
    UnknownMailbox(u32),

    /// The caller passed an argument outside the accepted range.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration was missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// The engine slot pool was shut down.
    #[error("engine slot pool closed")]
    SlotPoolClosed,

    /// Any other transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Short stable label, used as the failure reason in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Connection { .. } => "connection",
            ClientError::ShortRead { .. } => "short_read",
            ClientError::ShortWrite { .. } => "short_write",
            ClientError::Timeout { .. } => "timeout",
            ClientError::Entropy(_) => "entropy",
            ClientError::Seal => "seal",
            ClientError::Open(_) => "open",
            ClientError::Engine(_) => "engine",
            ClientError::Protocol(_) => "protocol",
            ClientError::WriteRejected(_) => "write_rejected",
            ClientError::UnknownMailbox(_) => "unknown_mailbox",
            ClientError::InvalidInput(_) => "invalid_input",
            ClientError::Config(_) => "config",
            ClientError::SlotPoolClosed => "slot_pool_closed",
            ClientError::Io(_) => "io",
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_convert() {
        let err: ClientError = EngineError::PayloadTooLarge {
            payload: 10,
            data_size: 4,
        }
        .into();
        assert_eq!(err.kind(), "engine");
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn test_rejected_status_in_message() {
        let err = ClientError::WriteRejected(7);
        assert_eq!(err.to_string(), "write rejected by leader with status 7");
    }
}
