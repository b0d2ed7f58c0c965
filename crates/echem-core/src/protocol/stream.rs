//! Transport abstraction
//!
//! A transport is opened once per session and split into a read half, owned
//! by the ingestion thread, and a write half, owned by the supervisor.

use super::ProtocolError;

/// Result of one attempt to read a line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, terminators included
    Line(String),
    /// The read timed out without a complete line
    Idle,
    /// A line arrived but was not valid text; skipped by the caller
    Undecodable(Vec<u8>),
}

/// Read half of an open transport
pub trait LineReader: Send {
    /// Block for at most the transport's read timeout and return what arrived.
    ///
    /// An `Err` counts as a read failure toward the fail-fast threshold.
    fn read_line(&mut self) -> Result<ReadOutcome, ProtocolError>;
}

/// Write half of an open transport
pub trait LineWriter: Send {
    /// Transmit `bytes` as-is (no terminator is appended)
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError>;

    /// Release the underlying handle. Safe to call more than once.
    fn close(&mut self);
}

/// Both halves of an open transport
pub struct TransportChannels {
    /// Read half, moved into the ingestion thread
    pub reader: Box<dyn LineReader>,
    /// Write half, kept by the session
    pub writer: Box<dyn LineWriter>,
}

/// Something that can open a channel to an instrument
pub trait TransportAdapter: Send {
    /// Short description for logs (port name, "simulated", ...)
    fn describe(&self) -> String;

    /// Open the channel and split it into halves
    fn open(&mut self) -> Result<TransportChannels, ProtocolError>;
}
