//! Shared test transports

#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use echem_core::config::{RunConfig, SimulatorConfig};
use echem_core::protocol::{
    LineReader, LineWriter, ProtocolError, ReadOutcome, TransportAdapter, TransportChannels,
};
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test harness; `RUST_LOG=echem_core=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fast simulated setup: 500x real time, short polls
pub fn fast_simulated() -> RunConfig {
    init_tracing();
    let mut config = RunConfig::with_simulator(SimulatorConfig {
        time_scale: 500.0,
        poll_interval_ms: 10,
        ..Default::default()
    });
    config.inbox_poll_ms = 10;
    config.progress_interval_ms = 20;
    config
}

/// Config for scripted transports with tight deadlines
pub fn tight(ack_ms: u64, start_ms: u64, run_ms: u64) -> RunConfig {
    init_tracing();
    let mut config = RunConfig::default();
    config.ack_timeout_ms = ack_ms;
    config.start_timeout_ms = start_ms;
    config.run_timeout_ms = Some(run_ms);
    config.inbox_poll_ms = 10;
    config.failure_backoff_ms = 5;
    config.join_grace_ms = 500;
    config
}

/// Instrument that answers with canned lines
#[derive(Debug, Clone, Default)]
pub struct ScriptedInstrument {
    /// Lines sent after a parameter command
    pub on_parameters: Vec<String>,
    /// Lines sent after a start byte
    pub on_start: Vec<String>,
    /// Make every read fail
    pub broken_reads: bool,
}

impl ScriptedInstrument {
    /// Never answers anything
    pub fn silent() -> Self {
        Self::default()
    }

    /// Acknowledges parameters, then replies to the start byte with `on_start`
    pub fn acking(on_start: &[&str]) -> Self {
        Self {
            on_parameters: vec!["#\r\n".to_string()],
            on_start: on_start.iter().map(|s| s.to_string()).collect(),
            broken_reads: false,
        }
    }

    /// Every read returns an error
    pub fn broken() -> Self {
        Self {
            broken_reads: true,
            ..Default::default()
        }
    }
}

impl TransportAdapter for ScriptedInstrument {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    fn open(&mut self) -> Result<TransportChannels, ProtocolError> {
        let (tx, rx) = mpsc::channel();
        Ok(TransportChannels {
            reader: Box::new(ScriptedReader {
                lines: rx,
                broken: self.broken_reads,
            }),
            writer: Box::new(ScriptedWriter {
                script: self.clone(),
                lines: tx,
            }),
        })
    }
}

struct ScriptedReader {
    lines: Receiver<String>,
    broken: bool,
}

impl LineReader for ScriptedReader {
    fn read_line(&mut self) -> Result<ReadOutcome, ProtocolError> {
        if self.broken {
            std::thread::sleep(Duration::from_millis(1));
            return Err(ProtocolError::SerialError("device disconnected".to_string()));
        }
        match self.lines.recv_timeout(Duration::from_millis(5)) {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Ok(ReadOutcome::Idle)
            }
        }
    }
}

struct ScriptedWriter {
    script: ScriptedInstrument,
    lines: Sender<String>,
}

impl LineWriter for ScriptedWriter {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let replies = if bytes.len() == 1 {
            &self.script.on_start
        } else {
            &self.script.on_parameters
        };
        for line in replies {
            let _ = self.lines.send(line.clone());
        }
        Ok(())
    }

    fn close(&mut self) {}
}
