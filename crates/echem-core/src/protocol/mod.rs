//! Analyzer Protocol Communication
//!
//! Implements the line-oriented ASCII protocol spoken by the analyzer.
//!
//! A run goes through parameter upload, acknowledgement, start, and a data
//! stream that ends with a completion marker. The same engine drives both
//! CV and DPV; the technique only changes the command layout.

mod buffer;
pub mod codec;
mod error;
mod ingest;
pub mod serial;
mod session;
mod state;
pub mod stream;
mod supervisor;

pub use buffer::{BufferView, DataBuffer, DataPoint};
pub use codec::{classify, decode_parameters, encode, start_command, CommandBytes, ResponseEvent};
pub use error::{ProtocolError, Result};
pub use ingest::{CancelToken, Inbound, IngestionConfig, IngestionHandle};
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use session::{SessionCounters, TransportSession};
pub use state::{ProtocolState, StateMachine};
pub use stream::{LineReader, LineWriter, ReadOutcome, TransportAdapter, TransportChannels};
pub use supervisor::{Progress, RunReport, RunSupervisor};

/// Default baud rate for the analyzer
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default serial read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// Default serial write timeout in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2000;

/// Deadline for the parameter acknowledgement (`#`)
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5000;

/// Deadline for the scan start confirmation (`*`)
pub const DEFAULT_START_TIMEOUT_MS: u64 = 5000;

/// Consecutive read failures after which the read loop gives up
pub const MAX_CONSECUTIVE_READ_FAILURES: u32 = 3;

/// Longest line accepted from the instrument before it is discarded
pub const MAX_LINE_LENGTH: usize = 4096;
