//! Run configuration
//!
//! Everything a run needs besides the technique parameters: which transport to
//! use, phase timeouts, and ingestion tuning. Durations are stored in
//! milliseconds so the whole structure round-trips through JSON.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::protocol::{
    ProtocolError, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_START_TIMEOUT_MS, DEFAULT_WRITE_TIMEOUT_MS, MAX_CONSECUTIVE_READ_FAILURES,
};
use crate::technique::Technique;

/// Serial link settings for a physical analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name; `None` means no target address was given
    pub port_name: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Write timeout in milliseconds
    pub write_timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port_name: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl SerialSettings {
    /// Settings for `port_name` with default timing
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: Some(port_name.into()),
            ..Default::default()
        }
    }

    /// Read timeout as a [`Duration`]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Write timeout as a [`Duration`]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Simulated instrument settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Seed for the noise generator
    pub seed: u64,
    /// Simulated seconds per wall-clock second (1.0 = real time)
    pub time_scale: f64,
    /// Potential of the DPV current peak (V)
    pub peak_center_v: f64,
    /// How long the simulated reader blocks before reporting idle (ms)
    pub poll_interval_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            time_scale: 1.0,
            peak_center_v: 0.3,
            poll_interval_ms: 100,
        }
    }
}

impl SimulatorConfig {
    /// Same settings, running `time_scale` times faster than real time
    pub fn accelerated(time_scale: f64) -> Self {
        Self {
            time_scale,
            ..Default::default()
        }
    }

    /// Reader poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject a pacing the generator cannot run at
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !(self.time_scale.is_finite() && self.time_scale > 0.0) {
            return Err(ProtocolError::InvalidConfig(format!(
                "time_scale must be positive, got {}",
                self.time_scale
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "simulator poll_interval_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which channel a run talks through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSelection {
    /// In-process simulated instrument
    Simulated(SimulatorConfig),
    /// Physical analyzer on a serial port
    Serial(SerialSettings),
}

impl Default for TransportSelection {
    fn default() -> Self {
        TransportSelection::Serial(SerialSettings::default())
    }
}

/// Configuration for one [`RunSupervisor`](crate::protocol::RunSupervisor)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Transport to open on connect
    pub transport: TransportSelection,
    /// How long to wait for the parameter acknowledgement (ms)
    pub ack_timeout_ms: u64,
    /// How long to wait for the start confirmation (ms)
    pub start_timeout_ms: u64,
    /// Acquisition deadline (ms); `None` uses the technique's default
    pub run_timeout_ms: Option<u64>,
    /// Interval between progress reports during acquisition (ms)
    pub progress_interval_ms: u64,
    /// How long one inbox poll blocks (ms)
    pub inbox_poll_ms: u64,
    /// Bound on lines buffered between reader and supervisor
    pub inbox_capacity: usize,
    /// Consecutive read failures that abandon the session
    pub max_consecutive_failures: u32,
    /// Pause after a tolerated read failure (ms)
    pub failure_backoff_ms: u64,
    /// How long disconnect waits for the reader thread (ms)
    pub join_grace_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            transport: TransportSelection::default(),
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
            run_timeout_ms: None,
            progress_interval_ms: 500,
            inbox_poll_ms: 100,
            inbox_capacity: 1024,
            max_consecutive_failures: MAX_CONSECUTIVE_READ_FAILURES,
            failure_backoff_ms: 500,
            join_grace_ms: 2000,
        }
    }
}

impl RunConfig {
    /// Defaults with the simulated instrument at real-time speed
    pub fn simulated() -> Self {
        Self::with_simulator(SimulatorConfig::default())
    }

    /// Defaults with a specific simulator setup
    pub fn with_simulator(simulator: SimulatorConfig) -> Self {
        Self {
            transport: TransportSelection::Simulated(simulator),
            ..Default::default()
        }
    }

    /// Defaults targeting a serial port
    pub fn serial(port_name: impl Into<String>) -> Self {
        Self {
            transport: TransportSelection::Serial(SerialSettings::for_port(port_name)),
            ..Default::default()
        }
    }

    /// Parse a (possibly partial) JSON configuration and validate it
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let config: RunConfig = serde_json::from_str(json)
            .map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the supervisor cannot work with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.inbox_capacity == 0 {
            return Err(ProtocolError::InvalidConfig(
                "inbox_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ProtocolError::InvalidConfig(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }
        if self.inbox_poll_ms == 0 || self.progress_interval_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "poll and progress intervals must be non-zero".to_string(),
            ));
        }
        match &self.transport {
            TransportSelection::Simulated(sim) => sim.validate()?,
            TransportSelection::Serial(serial) => {
                if serial.baud_rate == 0 {
                    return Err(ProtocolError::InvalidConfig(
                        "baud_rate must be non-zero".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Whether the simulated instrument is selected
    pub fn is_simulated(&self) -> bool {
        matches!(self.transport, TransportSelection::Simulated(_))
    }

    /// Switch to the simulated instrument, keeping simulator settings already present
    pub fn use_simulator(&mut self) {
        if !self.is_simulated() {
            self.transport = TransportSelection::Simulated(SimulatorConfig::default());
        }
    }

    /// Acknowledgement deadline
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Start confirmation deadline
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Acquisition deadline for `technique`
    pub fn run_timeout(&self, technique: Technique) -> Duration {
        self.run_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| technique.default_run_timeout())
    }

    /// Progress reporting interval
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Inbox poll interval
    pub fn inbox_poll(&self) -> Duration {
        Duration::from_millis(self.inbox_poll_ms)
    }

    /// Backoff after a tolerated read failure
    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    /// Reader-thread join grace period
    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.join_grace_ms)
    }
}
