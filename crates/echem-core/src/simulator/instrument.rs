//! Simulated instrument transport

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::Waveform;
use crate::config::SimulatorConfig;
use crate::protocol::codec::format_data_line;
use crate::protocol::{
    decode_parameters, CancelToken, LineReader, LineWriter, ProtocolError, ReadOutcome,
    TransportAdapter, TransportChannels,
};
use crate::technique::TechniqueParameters;

/// Transport backed by an in-process fake analyzer
#[derive(Debug, Clone, Default)]
pub struct SimulatedInstrument {
    config: SimulatorConfig,
}

impl SimulatedInstrument {
    /// Create a simulated instrument
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    /// Simulator settings
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }
}

impl TransportAdapter for SimulatedInstrument {
    fn describe(&self) -> String {
        format!("simulated (seed {}, x{})", self.config.seed, self.config.time_scale)
    }

    fn open(&mut self) -> Result<TransportChannels, ProtocolError> {
        self.config.validate()?;
        let (tx, rx) = mpsc::channel();
        info!("Simulated instrument ready");
        Ok(TransportChannels {
            reader: Box::new(SimReader {
                lines: rx,
                poll: self.config.poll_interval(),
            }),
            writer: Box::new(SimWriter {
                config: self.config.clone(),
                lines: Some(tx),
                parameters: None,
                halt: CancelToken::new(),
                generator: None,
            }),
        })
    }
}

struct SimReader {
    lines: Receiver<String>,
    poll: Duration,
}

impl LineReader for SimReader {
    fn read_line(&mut self) -> Result<ReadOutcome, ProtocolError> {
        match self.lines.recv_timeout(self.poll) {
            Ok(line) => Ok(ReadOutcome::Line(line)),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Idle),
            Err(RecvTimeoutError::Disconnected) => Err(ProtocolError::NotConnected),
        }
    }
}

/// Firmware side of the simulator: reacts to commands written by the host
struct SimWriter {
    config: SimulatorConfig,
    lines: Option<Sender<String>>,
    parameters: Option<TechniqueParameters>,
    halt: CancelToken,
    generator: Option<JoinHandle<()>>,
}

impl SimWriter {
    fn reply(&self, line: &str) -> Result<(), ProtocolError> {
        let lines = self.lines.as_ref().ok_or(ProtocolError::NotConnected)?;
        lines
            .send(line.to_string())
            .map_err(|_| ProtocolError::NotConnected)
    }

    fn handle_parameters(&mut self, command: &str) -> Result<(), ProtocolError> {
        match decode_parameters(command) {
            Ok(params) => {
                debug!("Simulator accepted {} parameters", params.technique());
                self.parameters = Some(params);
                self.reply("#\r\n")
            }
            Err(e) => {
                // real firmware stays silent on a command it cannot parse
                warn!("Simulator rejected parameter command: {}", e);
                Ok(())
            }
        }
    }

    fn handle_start(&mut self, byte: u8) -> Result<(), ProtocolError> {
        let Some(params) = self.parameters.clone() else {
            warn!("Simulator got start byte {:?} before parameters", byte as char);
            return Ok(());
        };
        if params.technique().start_byte() != byte {
            warn!(
                "Simulator got start byte {:?} but is configured for {}",
                byte as char,
                params.technique()
            );
            return Ok(());
        }
        if self.generator.as_ref().is_some_and(|g| !g.is_finished()) {
            debug!("Scan already running, ignoring start byte");
            return Ok(());
        }

        let lines = self
            .lines
            .clone()
            .ok_or(ProtocolError::NotConnected)?;
        self.reply("*\r\n")?;

        let waveform = Waveform::new(&params, &self.config);
        let time_scale = self.config.time_scale;
        let halt = self.halt.clone();
        let technique = params.technique();
        let handle = thread::Builder::new()
            .name("echem-sim".to_string())
            .spawn(move || {
                let period = waveform.period().div_f64(time_scale);
                let started = Instant::now();
                let mut sent = 0u32;
                for point in waveform {
                    if lines.send(format_data_line(technique, point)).is_err() {
                        return;
                    }
                    sent += 1;
                    let due = started + period * sent;
                    if halt.sleep(due.saturating_duration_since(Instant::now())) {
                        debug!("Simulated scan halted after {} samples", sent);
                        return;
                    }
                }
                let _ = lines.send("@\r\n".to_string());
                debug!("Simulated {} scan finished, {} samples", technique, sent);
            })?;
        self.generator = Some(handle);
        Ok(())
    }
}

impl LineWriter for SimWriter {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if self.lines.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        match bytes {
            [byte] => self.handle_start(*byte),
            _ => match std::str::from_utf8(bytes) {
                Ok(text) if text.starts_with('P') => self.handle_parameters(text),
                _ => {
                    debug!("Simulator ignoring {} unrecognised bytes", bytes.len());
                    Ok(())
                }
            },
        }
    }

    fn close(&mut self) {
        self.halt.cancel();
        self.lines = None;
        if let Some(generator) = self.generator.take() {
            let _ = generator.join();
        }
    }
}

impl Drop for SimWriter {
    fn drop(&mut self) {
        self.close();
    }
}
