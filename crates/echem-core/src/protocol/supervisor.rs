//! Run supervisor
//!
//! Drives one measurement end to end: connect, upload parameters, wait for the
//! acknowledgement, start the scan, drain samples until the completion marker,
//! and disconnect. Each waiting phase has its own deadline. Progress is pushed
//! to registered listeners while the run is in flight.
//!
//! The step methods are public so a caller can drive a run by hand; [`run`]
//! chains them and guarantees the disconnect on every exit path.
//!
//! [`run`]: RunSupervisor::run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::codec::{classify, encode, start_command};
use super::ingest::{CancelToken, Inbound};
use super::serial::SerialTransport;
use super::session::{SessionCounters, TransportSession};
use super::state::{ProtocolState, StateMachine};
use super::stream::TransportAdapter;
use super::{BufferView, DataPoint, ProtocolError, Result};
use crate::config::{RunConfig, TransportSelection};
use crate::simulator::SimulatedInstrument;
use crate::technique::{Technique, TechniqueParameters};

/// One progress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Overall completion, 0-100
    pub percent: u8,
    /// Human-readable phase description
    pub status: String,
    /// Samples collected so far
    pub samples: usize,
    /// Fraction of the run timeout already used (acquisition only)
    pub elapsed_fraction: f64,
    /// Protocol state when the report was taken
    pub state: ProtocolState,
    /// Copy of the buffer, attached during acquisition and on completion
    pub snapshot: Option<Vec<DataPoint>>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id for this run
    pub run_id: Uuid,
    /// Technique that was executed
    pub technique: Technique,
    /// Parameters sent to the instrument
    pub parameters: TechniqueParameters,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Final protocol state
    pub final_state: ProtocolState,
    /// Every sample, in arrival order
    pub points: Vec<DataPoint>,
    /// Traffic and parse counters
    pub counters: SessionCounters,
}

impl RunReport {
    /// Wall-clock length of the run
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

type ProgressCallback = Box<dyn FnMut(&Progress) + Send>;

/// Drives measurement runs against one transport
pub struct RunSupervisor {
    config: RunConfig,
    adapter: Box<dyn TransportAdapter>,
    session: Option<TransportSession>,
    machine: StateMachine,
    callbacks: Vec<ProgressCallback>,
    subscribers: Vec<Sender<Progress>>,
    cancel: CancelToken,
    last_counters: SessionCounters,
}

impl RunSupervisor {
    /// Supervisor using the transport selected in `config`
    pub fn new(config: RunConfig) -> Self {
        let adapter: Box<dyn TransportAdapter> = match &config.transport {
            TransportSelection::Simulated(sim) => Box::new(SimulatedInstrument::new(sim.clone())),
            TransportSelection::Serial(serial) => Box::new(SerialTransport::new(serial.clone())),
        };
        Self::with_adapter(config, adapter)
    }

    /// Supervisor using a caller-provided transport; `config.transport` is ignored
    pub fn with_transport<T>(config: RunConfig, transport: T) -> Self
    where
        T: TransportAdapter + 'static,
    {
        Self::with_adapter(config, Box::new(transport))
    }

    fn with_adapter(config: RunConfig, adapter: Box<dyn TransportAdapter>) -> Self {
        Self {
            config,
            adapter,
            session: None,
            machine: StateMachine::new(Technique::Cv),
            callbacks: Vec::new(),
            subscribers: Vec::new(),
            cancel: CancelToken::new(),
            last_counters: SessionCounters::default(),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Call `callback` on every progress report
    pub fn on_progress<F>(&mut self, callback: F)
    where
        F: FnMut(&Progress) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Receive progress reports over a channel
    pub fn subscribe(&mut self) -> Receiver<Progress> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Token that aborts the current run with [`ProtocolError::Cancelled`]
    /// when fired from any thread
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Current protocol state
    pub fn state(&self) -> ProtocolState {
        self.machine.current_state()
    }

    /// Live read-only view of the sample buffer
    pub fn buffer_view(&self) -> BufferView {
        self.machine.buffer_view()
    }

    /// Copy of the samples collected so far
    pub fn snapshot(&self) -> Vec<DataPoint> {
        self.machine.buffer_snapshot()
    }

    /// Whether a session is open
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Traffic and parse counters for the current or most recent session
    pub fn counters(&self) -> SessionCounters {
        let mut counters = self
            .session
            .as_ref()
            .map_or(self.last_counters, TransportSession::counters);
        counters.malformed_lines = self.machine.malformed_count();
        counters.ignored_events = self.machine.ignored_count();
        counters
    }

    /// Open the transport and start the reader thread
    pub fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        self.config.validate()?;

        let session = TransportSession::open(self.adapter.as_mut(), &self.config)?;
        self.machine.reset(self.machine.technique());
        self.last_counters = SessionCounters::default();
        self.session = Some(session);
        Ok(())
    }

    /// Encode and transmit the parameter command
    pub fn send_parameters(&mut self, params: &TechniqueParameters) -> Result<()> {
        if self.session.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        let command = encode(params)?;

        if self.machine.current_state() == ProtocolState::Idle {
            self.machine.reset(params.technique());
        }
        self.machine.mark_parameters_sent()?;

        info!("Sending {} parameters: {}", params.technique(), command);
        self.write(&command)
    }

    /// Wait for the instrument to acknowledge the parameters
    pub fn await_parameter_set(&mut self) -> Result<()> {
        match self.machine.current_state() {
            ProtocolState::WaitingAck | ProtocolState::ParameterSet => {}
            state => {
                return Err(ProtocolError::InvalidTransition {
                    state,
                    action: "await acknowledgement",
                })
            }
        }
        self.await_state(
            ProtocolState::ParameterSet,
            self.config.ack_timeout(),
            |elapsed| ProtocolError::AckTimeout { elapsed },
        )
    }

    /// Transmit the start byte
    pub fn send_start(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        self.machine.mark_start_sent()?;
        let command = start_command(self.machine.technique());
        info!("Starting {} scan", self.machine.technique());
        self.write(&command)
    }

    /// Wait for the instrument to confirm the scan has started
    pub fn await_receiving(&mut self) -> Result<()> {
        match self.machine.current_state() {
            ProtocolState::StartingTest | ProtocolState::ReceivingData => {}
            state => {
                return Err(ProtocolError::InvalidTransition {
                    state,
                    action: "await scan start",
                })
            }
        }
        self.await_state(
            ProtocolState::ReceivingData,
            self.config.start_timeout(),
            |elapsed| ProtocolError::StartTimeout { elapsed },
        )
    }

    /// Drain samples until the completion marker or the run deadline.
    ///
    /// On timeout the state is left where it was so the caller can see how
    /// far the run got.
    pub fn stream_until_complete(&mut self) -> Result<()> {
        match self.machine.current_state() {
            ProtocolState::ReceivingData | ProtocolState::TestComplete => {}
            state => {
                return Err(ProtocolError::InvalidTransition {
                    state,
                    action: "stream samples",
                })
            }
        }

        let technique = self.machine.technique();
        let timeout = self.config.run_timeout(technique);
        let interval = self.config.progress_interval();
        let poll = self.config.inbox_poll();
        let started = Instant::now();
        let mut next_report = started + interval;

        loop {
            if self.machine.current_state() == ProtocolState::TestComplete {
                let fraction = fraction_of(started.elapsed(), timeout);
                self.emit(100, "Scan complete".to_string(), fraction, true);
                return Ok(());
            }

            let now = Instant::now();
            let elapsed = now - started;
            if elapsed >= timeout {
                let state = self.machine.current_state();
                warn!(
                    "{} run timed out after {:?} with {} samples",
                    technique,
                    elapsed,
                    self.machine.buffer_view().len()
                );
                return Err(ProtocolError::RunTimeout { elapsed, state });
            }

            if now >= next_report {
                let fraction = fraction_of(elapsed, timeout);
                let percent = (50.0 + fraction * 45.0).min(95.0) as u8;
                let samples = self.machine.buffer_view().len();
                self.emit(percent, format!("Acquired {} samples", samples), fraction, true);
                next_report += interval;
            }

            let wait = poll
                .min(timeout - elapsed)
                .min(next_report.saturating_duration_since(now));
            self.pump(wait)?;
        }
    }

    /// Close the session. Safe to call at any time, any number of times.
    pub fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.last_counters = session.counters();
            session.close();
        }
        if self.cancel.is_cancelled() {
            // stale cancellation must not leak into the next run
            self.cancel = CancelToken::new();
        }
    }

    /// Run a complete measurement.
    ///
    /// Disconnects on every exit path. Returns the collected samples on
    /// completion, or the first fatal error.
    pub fn run(&mut self, params: impl Into<TechniqueParameters>) -> Result<RunReport> {
        // a session opened by the caller is theirs to close
        if self.session.is_some() {
            return Err(ProtocolError::AlreadyConnected);
        }
        let parameters = params.into();
        let technique = parameters.technique();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("Run {} ({}) starting", run_id, technique);

        let outcome = self.execute(&parameters);
        let counters = self.counters();
        self.disconnect();

        match outcome {
            Ok(()) => {
                let report = RunReport {
                    run_id,
                    technique,
                    parameters,
                    started_at,
                    finished_at: Utc::now(),
                    final_state: self.machine.current_state(),
                    points: self.machine.buffer_snapshot(),
                    counters,
                };
                info!(
                    "Run {} finished: {} samples in {}ms",
                    run_id,
                    report.points.len(),
                    report.duration().num_milliseconds()
                );
                Ok(report)
            }
            Err(e) => {
                error!("Run {} failed in {}: {}", run_id, self.machine.current_state(), e);
                Err(e)
            }
        }
    }

    fn execute(&mut self, parameters: &TechniqueParameters) -> Result<()> {
        self.emit_phase(10, "Connecting");
        self.connect()?;
        self.emit_phase(20, "Setting parameters");
        self.send_parameters(parameters)?;
        self.emit_phase(30, "Waiting for acknowledgement");
        self.await_parameter_set()?;
        self.emit_phase(40, "Starting scan");
        self.send_start()?;
        self.await_receiving()?;
        self.emit_phase(50, "Acquiring data");
        self.stream_until_complete()
    }

    fn write(&mut self, command: &super::CommandBytes) -> Result<()> {
        let session = self.session.as_mut().ok_or(ProtocolError::NotConnected)?;
        if let Err(e) = session.write(command) {
            self.machine.fail(&e.to_string());
            return Err(e);
        }
        Ok(())
    }

    fn await_state<F>(&mut self, target: ProtocolState, timeout: Duration, on_timeout: F) -> Result<()>
    where
        F: FnOnce(Duration) -> ProtocolError,
    {
        let poll = self.config.inbox_poll();
        let started = Instant::now();
        loop {
            if self.machine.current_state() == target {
                debug!("Reached {} after {:?}", target, started.elapsed());
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                let err = on_timeout(elapsed);
                self.machine.fail(&err.to_string());
                return Err(err);
            }
            self.pump(poll.min(timeout - elapsed))?;
        }
    }

    /// Take at most one inbound item and feed it to the state machine
    fn pump(&mut self, wait: Duration) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.machine.fail("cancelled by user");
            return Err(ProtocolError::Cancelled);
        }
        let session = self.session.as_mut().ok_or(ProtocolError::NotConnected)?;
        match session.recv(wait) {
            Some(Inbound::Line(line)) => {
                if let Some(event) = classify(self.machine.technique(), &line) {
                    self.machine.submit(event);
                }
                Ok(())
            }
            Some(Inbound::Fatal(e)) => {
                self.machine.fail(&e.to_string());
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn emit_phase(&mut self, percent: u8, status: &str) {
        self.emit(percent, status.to_string(), 0.0, false);
    }

    fn emit(&mut self, percent: u8, status: String, elapsed_fraction: f64, with_snapshot: bool) {
        if self.callbacks.is_empty() && self.subscribers.is_empty() {
            return;
        }
        let progress = Progress {
            percent,
            status,
            samples: self.machine.buffer_view().len(),
            elapsed_fraction,
            state: self.machine.current_state(),
            snapshot: with_snapshot.then(|| self.machine.buffer_snapshot()),
        };
        debug!("Progress {}%: {}", progress.percent, progress.status);

        for callback in &mut self.callbacks {
            callback(&progress);
        }
        self.subscribers.retain(|tx| tx.send(progress.clone()).is_ok());
    }
}

impl Drop for RunSupervisor {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn fraction_of(elapsed: Duration, timeout: Duration) -> f64 {
    if timeout.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / timeout.as_secs_f64()).min(1.0)
}
