//! # Error Types
//!
//! Error handling for the game protocol client.
//!
//! ## Error Categories
//! - **Registration**: duplicate opcodes, invalid schemas (programmer errors, fatal at setup)
//! - **Decode**: unknown opcodes (tolerated outside the handshake), malformed frames (fatal)
//! - **Session**: handshake rejection, keep-alive timeout, transport failure
//! - **Configuration**: invalid or unreadable configuration
//!
//! Every failure that ends a connection is reported exactly once through the
//! dispatcher's [`Error`](crate::protocol::dispatcher::EventKind::Error) event and
//! returned from [`Connection::closed`](crate::protocol::connection::Connection::closed).
//!
//! ## Example Usage
//! ```rust
//! use nebulous_client::error::{ErrorKind, ProtocolError};
//!
//! let err = ProtocolError::MalformedPacket("string length 40 exceeds 3 remaining bytes".into());
//! assert_eq!(err.kind(), ErrorKind::MalformedPacket);
//! assert!(err.is_fatal());
//! ```

use crate::core::packet::ConnectResultCode;
use crate::core::registry::Direction;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Decode errors
    pub const ERR_EMPTY_FRAME: &str = "Empty frame (no opcode byte)";
    pub const ERR_BAD_UTF8: &str = "Length-prefixed string is not valid UTF-8";
    pub const ERR_BAD_DELTA_ACTION: &str = "Unknown delta record action";

    /// Connection errors
    pub const ERR_TRANSPORT_CLOSED: &str = "Transport closed by peer";
    pub const ERR_HANDSHAKE_TIMEOUT: &str = "No handshake result before deadline";
    pub const ERR_ALREADY_RUNNING: &str = "Connection is already running";

    /// Schema errors
    pub const ERR_OPTIONAL_NOT_TRAILING: &str = "Optional fields must be trailing";
    pub const ERR_UNKNOWN_COUNT_FIELD: &str = "List count refers to an unknown earlier field";
}

/// ProtocolError is the primary error type for all client operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("Opcode {opcode} already registered for {direction}")]
    DuplicateOpcode { opcode: u8, direction: Direction },

    #[error("Unknown opcode {opcode} for {direction}")]
    UnknownOpcode { opcode: u8, direction: Direction },

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Handshake rejected by server: {0:?}")]
    HandshakeRejected(ConnectResultCode),

    #[error("Keep-alive timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid field value: {0}")]
    InvalidField(String),

    #[error("Invalid connection state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

// `io::Error` is not `Clone`; the copy keeps its kind and message.
impl Clone for ProtocolError {
    fn clone(&self) -> Self {
        match self {
            ProtocolError::DuplicateOpcode { opcode, direction } => ProtocolError::DuplicateOpcode {
                opcode: *opcode,
                direction: *direction,
            },
            ProtocolError::UnknownOpcode { opcode, direction } => ProtocolError::UnknownOpcode {
                opcode: *opcode,
                direction: *direction,
            },
            ProtocolError::MalformedPacket(msg) => ProtocolError::MalformedPacket(msg.clone()),
            ProtocolError::HandshakeRejected(code) => ProtocolError::HandshakeRejected(*code),
            ProtocolError::Timeout => ProtocolError::Timeout,
            ProtocolError::TransportError(msg) => ProtocolError::TransportError(msg.clone()),
            ProtocolError::Io(err) => ProtocolError::Io(io::Error::new(err.kind(), err.to_string())),
            ProtocolError::InvalidSchema(msg) => ProtocolError::InvalidSchema(msg.clone()),
            ProtocolError::InvalidField(msg) => ProtocolError::InvalidField(msg.clone()),
            ProtocolError::InvalidState { expected, actual } => ProtocolError::InvalidState {
                expected: expected.clone(),
                actual: actual.clone(),
            },
            ProtocolError::ConnectionClosed => ProtocolError::ConnectionClosed,
            ProtocolError::ConfigError(msg) => ProtocolError::ConfigError(msg.clone()),
        }
    }
}

/// Coarse classification of a [`ProtocolError`], cheap to copy into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    DuplicateOpcode,
    UnknownOpcode,
    MalformedPacket,
    HandshakeRejected,
    Timeout,
    Transport,
    Schema,
    InvalidField,
    InvalidState,
    Closed,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::DuplicateOpcode { .. } => ErrorKind::DuplicateOpcode,
            ProtocolError::UnknownOpcode { .. } => ErrorKind::UnknownOpcode,
            ProtocolError::MalformedPacket(_) => ErrorKind::MalformedPacket,
            ProtocolError::HandshakeRejected(_) => ErrorKind::HandshakeRejected,
            ProtocolError::Timeout => ErrorKind::Timeout,
            ProtocolError::TransportError(_) | ProtocolError::Io(_) => ErrorKind::Transport,
            ProtocolError::InvalidSchema(_) => ErrorKind::Schema,
            ProtocolError::InvalidField(_) => ErrorKind::InvalidField,
            ProtocolError::InvalidState { .. } => ErrorKind::InvalidState,
            ProtocolError::ConnectionClosed => ErrorKind::Closed,
            ProtocolError::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Whether this error must end the connection it occurred on.
    ///
    /// Only an unknown opcode outside the handshake is absorbed locally; the
    /// connection engine decides that case itself since it depends on state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::UnknownOpcode { .. })
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProtocolError::MalformedPacket(msg.into())
    }

    pub(crate) fn invalid_state(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        ProtocolError::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Error summary delivered through the dispatcher's error event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ProtocolError> for ErrorReport {
    fn from(err: &ProtocolError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let err = ProtocolError::UnknownOpcode {
            opcode: 200,
            direction: Direction::ServerToClient,
        };
        assert_eq!(err.kind(), ErrorKind::UnknownOpcode);
        assert!(!err.is_fatal());

        let io = ProtocolError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(io.kind(), ErrorKind::Transport);
        assert!(io.is_fatal());
        assert!(ProtocolError::Timeout.is_fatal());
    }

    #[test]
    fn test_report_carries_message() {
        let err = ProtocolError::HandshakeRejected(ConnectResultCode::GameNotFound);
        let report = ErrorReport::from(&err);
        assert_eq!(report.kind, ErrorKind::HandshakeRejected);
        assert!(report.message.contains("GameNotFound"));
    }

    #[test]
    fn test_clone_keeps_io_kind() {
        let err = ProtocolError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let ProtocolError::Io(copy) = err.clone() else {
            panic!("expected Io");
        };
        assert_eq!(copy.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(err.to_string(), ProtocolError::Io(copy).to_string());
    }
}
