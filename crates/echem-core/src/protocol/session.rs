//! Transport session
//!
//! Owns one open transport for the length of a run: the write half, the
//! reader thread, and the inbox it feeds. Closing is idempotent and also
//! happens on drop.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info};

use super::ingest::{CancelToken, Inbound, IngestionConfig, IngestionHandle};
use super::stream::{LineWriter, TransportAdapter};
use super::{CommandBytes, ProtocolError};
use crate::config::RunConfig;

/// Traffic counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Bytes written to the instrument
    pub tx_bytes: u64,
    /// Commands written to the instrument
    pub tx_commands: u64,
    /// Lines received from the instrument
    pub rx_lines: u64,
    /// Data lines that failed to parse
    pub malformed_lines: u64,
    /// Events the state machine absorbed as no-ops
    pub ignored_events: u64,
}

/// An open channel to an instrument plus its reader thread
pub struct TransportSession {
    description: String,
    writer: Box<dyn LineWriter>,
    ingestion: IngestionHandle,
    inbox: Receiver<Inbound>,
    cancel: CancelToken,
    counters: SessionCounters,
    join_grace: Duration,
    closed: bool,
}

impl TransportSession {
    /// Open `adapter` and start reading from it
    pub fn open(
        adapter: &mut dyn TransportAdapter,
        config: &RunConfig,
    ) -> Result<Self, ProtocolError> {
        let description = adapter.describe();
        let channels = adapter.open()?;

        let (inbox_tx, inbox) = mpsc::sync_channel(config.inbox_capacity);
        let cancel = CancelToken::new();
        let ingestion = IngestionHandle::spawn(
            channels.reader,
            inbox_tx,
            cancel.clone(),
            IngestionConfig {
                max_consecutive_failures: config.max_consecutive_failures,
                failure_backoff: config.failure_backoff(),
            },
        )?;

        info!("Session opened on {}", description);

        Ok(Self {
            description,
            writer: channels.writer,
            ingestion,
            inbox,
            cancel,
            counters: SessionCounters::default(),
            join_grace: config.join_grace(),
            closed: false,
        })
    }

    /// What this session is connected to
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Traffic so far
    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// Transmit one command
    pub fn write(&mut self, command: &CommandBytes) -> Result<(), ProtocolError> {
        if self.closed {
            return Err(ProtocolError::NotConnected);
        }
        debug!(target: "echem_core::wire", "TX {:?}", command.as_str());
        self.writer.write_bytes(command.as_bytes())?;
        self.counters.tx_bytes += command.len() as u64;
        self.counters.tx_commands += 1;
        Ok(())
    }

    /// Wait up to `timeout` for the next inbound item.
    ///
    /// `None` means nothing arrived in time. A reader thread that vanished
    /// without reporting is surfaced as a fatal transport failure.
    pub fn recv(&mut self, timeout: Duration) -> Option<Inbound> {
        if self.closed {
            return None;
        }
        match self.inbox.recv_timeout(timeout) {
            Ok(Inbound::Line(line)) => {
                self.counters.rx_lines += 1;
                debug!(target: "echem_core::wire", "RX {:?}", line);
                Some(Inbound::Line(line))
            }
            Ok(fatal) => Some(fatal),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(Inbound::Fatal(ProtocolError::TransportFailed {
                    failures: 0,
                    reason: "reader thread exited".to_string(),
                }))
            }
        }
    }

    /// Stop the reader, release the channel. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.writer.close();
        self.ingestion.stop_and_join(self.join_grace);
        info!(
            "Session on {} closed (tx {} bytes / {} commands, rx {} lines)",
            self.description,
            self.counters.tx_bytes,
            self.counters.tx_commands,
            self.counters.rx_lines
        );
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("description", &self.description)
            .field("counters", &self.counters)
            .field("closed", &self.closed)
            .finish()
    }
}
