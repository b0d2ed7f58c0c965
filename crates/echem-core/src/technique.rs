//! Measurement techniques
//!
//! Defines the two supported scan techniques and the parameter set each one
//! sends to the instrument. The wire layout of these parameters lives in
//! [`crate::protocol::codec`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::protocol::ProtocolError;

/// Scan technique executed by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Technique {
    /// Cyclic voltammetry
    Cv,
    /// Differential pulse voltammetry
    Dpv,
}

impl Technique {
    /// Single byte that starts a scan once parameters are accepted
    pub fn start_byte(&self) -> u8 {
        match self {
            Technique::Cv => b'S',
            Technique::Dpv => b'D',
        }
    }

    /// Suffix appended after the last parameter field
    pub fn command_terminator(&self) -> &'static str {
        match self {
            Technique::Cv => ",",
            Technique::Dpv => ",D",
        }
    }

    /// Whether `marker` ends a scan for this technique.
    ///
    /// Both techniques finish on `@`; only DPV firmware also sends `$`.
    pub fn accepts_completion_marker(&self, marker: &str) -> bool {
        match marker {
            "@" => true,
            "$" => *self == Technique::Dpv,
            _ => false,
        }
    }

    /// Overall deadline for the streaming phase when none is configured
    pub fn default_run_timeout(&self) -> Duration {
        match self {
            Technique::Cv => Duration::from_secs(90),
            Technique::Dpv => Duration::from_secs(120),
        }
    }

    /// Decimal digits the instrument prints for current values
    pub fn current_decimals(&self) -> usize {
        match self {
            Technique::Cv => 4,
            Technique::Dpv => 2,
        }
    }

    pub(crate) fn progress_log_stride(&self) -> usize {
        match self {
            Technique::Cv => 10,
            Technique::Dpv => 20,
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Technique::Cv => write!(f, "CV"),
            Technique::Dpv => write!(f, "DPV"),
        }
    }
}

/// Sweep direction relative to the start potential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    /// Sweep from start toward end potential (wire value `1`)
    #[default]
    Forward,
    /// Sweep in the negative direction (wire value `-1`)
    Reverse,
}

impl ScanDirection {
    /// Integer used on the wire
    pub fn wire_value(&self) -> i64 {
        match self {
            ScanDirection::Forward => 1,
            ScanDirection::Reverse => -1,
        }
    }

    /// Parse the wire integer back into a direction
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            1 => Some(ScanDirection::Forward),
            -1 => Some(ScanDirection::Reverse),
            _ => None,
        }
    }
}

/// Cyclic voltammetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvParameters {
    /// Start potential (V)
    pub start_v: f64,
    /// End potential (V)
    pub end_v: f64,
    /// Scan direction
    pub scan_direction: ScanDirection,
    /// Scan rate (V/s)
    pub scan_rate: f64,
    /// Number of cycles
    pub cycles: u32,
    /// Full-scale current range (µA)
    pub current_range: u32,
}

impl Default for CvParameters {
    fn default() -> Self {
        Self {
            start_v: -1.0,
            end_v: 1.0,
            scan_direction: ScanDirection::Forward,
            scan_rate: 0.2,
            cycles: 2,
            current_range: 50,
        }
    }
}

/// DPV vertex value that lets the instrument choose the vertex
pub const DPV_VERTEX_AUTO: f64 = -1.0;

/// Differential pulse voltammetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpvParameters {
    /// Start potential (V)
    pub start_v: f64,
    /// End potential (V)
    pub end_v: f64,
    /// Scan direction
    pub scan_direction: ScanDirection,
    /// Pulse amplitude (V)
    pub pulse_height: f64,
    /// Start potential of the second scan (V)
    pub second_start_v: f64,
    /// Number of cycles
    pub cycles: u32,
    /// Vertex potential (V); [`DPV_VERTEX_AUTO`] lets the instrument choose
    pub vertex_v: f64,
    /// Pulse width (ms)
    pub pulse_width_ms: u32,
    /// Pulse period (ms)
    pub pulse_period_ms: u32,
    /// Sampling window width (ms)
    pub sample_width_ms: u32,
    /// Full-scale current range (µA)
    pub current_range: u32,
}

impl Default for DpvParameters {
    fn default() -> Self {
        Self {
            start_v: -1.0,
            end_v: 1.0,
            scan_direction: ScanDirection::Forward,
            pulse_height: 0.1,
            second_start_v: -1.0,
            cycles: 2,
            vertex_v: DPV_VERTEX_AUTO,
            pulse_width_ms: 10,
            pulse_period_ms: 10,
            sample_width_ms: 20,
            current_range: 50,
        }
    }
}

/// Parameters for one run, tagged by technique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "technique", rename_all = "lowercase")]
pub enum TechniqueParameters {
    /// Cyclic voltammetry run
    Cv(CvParameters),
    /// Differential pulse voltammetry run
    Dpv(DpvParameters),
}

impl TechniqueParameters {
    /// Technique these parameters configure
    pub fn technique(&self) -> Technique {
        match self {
            TechniqueParameters::Cv(_) => Technique::Cv,
            TechniqueParameters::Dpv(_) => Technique::Dpv,
        }
    }

    /// Configured start potential (V)
    pub fn start_v(&self) -> f64 {
        match self {
            TechniqueParameters::Cv(p) => p.start_v,
            TechniqueParameters::Dpv(p) => p.start_v,
        }
    }

    /// Configured end potential (V)
    pub fn end_v(&self) -> f64 {
        match self {
            TechniqueParameters::Cv(p) => p.end_v,
            TechniqueParameters::Dpv(p) => p.end_v,
        }
    }

    /// Reject parameter sets the instrument cannot represent
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            TechniqueParameters::Cv(p) => {
                check_finite("start_v", p.start_v)?;
                check_finite("end_v", p.end_v)?;
                check_finite("scan_rate", p.scan_rate)?;
                if p.scan_rate <= 0.0 {
                    return Err(invalid("scan_rate must be positive"));
                }
                check_common(p.start_v, p.end_v, p.cycles, p.current_range)
            }
            TechniqueParameters::Dpv(p) => {
                check_finite("start_v", p.start_v)?;
                check_finite("end_v", p.end_v)?;
                check_finite("pulse_height", p.pulse_height)?;
                check_finite("second_start_v", p.second_start_v)?;
                check_finite("vertex_v", p.vertex_v)?;
                if p.pulse_width_ms == 0 || p.pulse_period_ms == 0 || p.sample_width_ms == 0 {
                    return Err(invalid("pulse timings must be non-zero"));
                }
                check_common(p.start_v, p.end_v, p.cycles, p.current_range)
            }
        }
    }
}

impl From<CvParameters> for TechniqueParameters {
    fn from(params: CvParameters) -> Self {
        TechniqueParameters::Cv(params)
    }
}

impl From<DpvParameters> for TechniqueParameters {
    fn from(params: DpvParameters) -> Self {
        TechniqueParameters::Dpv(params)
    }
}

fn invalid(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidParameters(reason.into())
}

fn check_finite(name: &str, value: f64) -> Result<(), ProtocolError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{} is not a finite number ({})", name, value)))
    }
}

fn check_common(start_v: f64, end_v: f64, cycles: u32, current_range: u32) -> Result<(), ProtocolError> {
    if start_v == end_v {
        return Err(invalid("start and end potential must differ"));
    }
    if cycles == 0 {
        return Err(invalid("cycles must be at least 1"));
    }
    if current_range == 0 {
        return Err(invalid("current_range must be non-zero"));
    }
    Ok(())
}
