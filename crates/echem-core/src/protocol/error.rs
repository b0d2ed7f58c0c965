//! Protocol errors

use std::time::Duration;
use thiserror::Error;

use super::ProtocolState;

/// Result type for protocol engine operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while driving the analyzer
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("No serial port configured and simulation disabled")]
    MissingAddress,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Transport failed after {failures} consecutive errors: {reason}")]
    TransportFailed { failures: u32, reason: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Cannot encode command: {0}")]
    Encoding(String),

    #[error("Parameters not acknowledged after {elapsed:?}")]
    AckTimeout { elapsed: Duration },

    #[error("Scan start not confirmed after {elapsed:?}")]
    StartTimeout { elapsed: Duration },

    #[error("Run did not complete after {elapsed:?} (state: {state})")]
    RunTimeout {
        elapsed: Duration,
        state: ProtocolState,
    },

    #[error("Not connected to instrument")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        state: ProtocolState,
        action: &'static str,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether the error was raised by a phase deadline
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProtocolError::AckTimeout { .. }
                | ProtocolError::StartTimeout { .. }
                | ProtocolError::RunTimeout { .. }
        )
    }
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        ProtocolError::SerialError(err.to_string())
    }
}
