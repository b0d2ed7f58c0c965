//! Simulated analyzer
//!
//! An in-process instrument that speaks the same line protocol as the real
//! hardware. It acknowledges parameter commands, confirms the start byte, and
//! streams a synthetic CV or DPV curve with seeded noise before sending the
//! completion marker. Useful for UI work and for tests without hardware.

mod instrument;
mod waveform;

pub use instrument::SimulatedInstrument;
pub use waveform::Waveform;
