//! # echem-core
//!
//! Protocol engine for benchtop electrochemical analyzers driven over a
//! serial link with a line-oriented ASCII protocol.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Command encoding and response classification for the analyzer protocol
//! - A measurement lifecycle state machine with a streaming sample buffer
//! - Serial and simulated transports behind one adapter trait
//! - A run supervisor with per-phase timeouts and a progress feed
//!
//! ## Supported techniques
//!
//! - Cyclic voltammetry (CV)
//! - Differential pulse voltammetry (DPV)
//!
//! ## Example
//!
//! ```rust,no_run
//! use echem_core::prelude::*;
//!
//! let config = RunConfig::simulated();
//! let mut supervisor = RunSupervisor::new(config);
//! let report = supervisor.run(TechniqueParameters::Cv(CvParameters::default()))?;
//! println!("{} samples, final state {}", report.points.len(), report.final_state);
//! # Ok::<(), echem_core::protocol::ProtocolError>(())
//! ```

pub mod config;
pub mod protocol;
pub mod simulator;
pub mod technique;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{RunConfig, SerialSettings, SimulatorConfig, TransportSelection};
    pub use crate::protocol::{
        classify, encode, BufferView, DataPoint, Progress, ProtocolError, ProtocolState,
        ResponseEvent, RunReport, RunSupervisor, StateMachine,
    };
    pub use crate::simulator::SimulatedInstrument;
    pub use crate::technique::{
        CvParameters, DpvParameters, ScanDirection, Technique, TechniqueParameters,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
