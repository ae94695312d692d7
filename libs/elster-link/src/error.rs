//! Elster Link Error Types
//!
//! Error kinds for the frame/value codec, request correlation and bus commands.

use std::time::Duration;

use thiserror::Error;

use crate::value::ValueKind;

/// Result type for elster-link operations
pub type Result<T> = std::result::Result<T, ElsterError>;

/// Elster link errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ElsterError {
    /// Register address is not part of the register table
    #[error("Unknown register 0x{0:04X}")]
    UnknownRegister(u16),

    /// No matching reply arrived before the deadline
    #[error("Timeout waiting for register 0x{register:04X} after {timeout:?}")]
    RequestTimeout { register: u16, timeout: Duration },

    /// Payload bytes are not a valid encoding for the value kind
    #[error("Invalid encoded {kind} value: {bytes:02X?}")]
    InvalidEncodedValue { kind: ValueKind, bytes: [u8; 2] },

    /// Operation has no wire convention
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Bus interface could not be opened
    #[error("Connection failed: {interface}: {reason}")]
    ConnectionFailed { interface: String, reason: String },

    /// Bus was disconnected while an operation was in flight
    #[error("Bus disconnected")]
    Disconnected,

    /// Frame does not follow the bus layout
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Typed value cannot be placed on the wire
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for ElsterError {
    fn from(err: std::io::Error) -> Self {
        ElsterError::Io(err.to_string())
    }
}

impl From<figment::Error> for ElsterError {
    fn from(err: figment::Error) -> Self {
        ElsterError::Config(err.to_string())
    }
}

// Helper methods for creating errors
impl ElsterError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        ElsterError::UnsupportedOperation(msg.into())
    }

    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        ElsterError::InvalidFrame(msg.into())
    }

    pub fn invalid_value(msg: impl Into<String>) -> Self {
        ElsterError::InvalidValue(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        ElsterError::Config(msg.into())
    }

    pub fn connection_failed(interface: impl Into<String>, reason: impl Into<String>) -> Self {
        ElsterError::ConnectionFailed {
            interface: interface.into(),
            reason: reason.into(),
        }
    }
}
