//! Measurement lifecycle state machine
//!
//! Owns the protocol state and the sample buffer for one run. Transitions are
//! driven by classified [`ResponseEvent`]s and by the two host-side actions
//! (parameters sent, start sent). Events that do not fit the current state are
//! logged and absorbed; real instruments are chatty and the protocol is
//! tolerant of that.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

use super::{BufferView, DataBuffer, DataPoint, ProtocolError, ResponseEvent};
use crate::technique::Technique;

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolState {
    /// Nothing sent yet
    Idle,
    /// Parameters acknowledged by the instrument
    ParameterSet,
    /// Parameters sent, waiting for `#`
    WaitingAck,
    /// Start sent, waiting for `*`
    StartingTest,
    /// Streaming samples
    ReceivingData,
    /// Completion marker received
    TestComplete,
    /// Fatal failure
    Error,
}

impl ProtocolState {
    /// Whether only a fresh session can leave this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolState::TestComplete | ProtocolState::Error)
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// State, buffer, and per-run bookkeeping
#[derive(Debug)]
pub struct StateMachine {
    technique: Technique,
    state: ProtocolState,
    buffer: DataBuffer,
    malformed: u64,
    ignored: u64,
}

impl StateMachine {
    /// Create a machine in `Idle` for `technique`
    pub fn new(technique: Technique) -> Self {
        Self {
            technique,
            state: ProtocolState::Idle,
            buffer: DataBuffer::new(),
            malformed: 0,
            ignored: 0,
        }
    }

    /// Back to `Idle` for a fresh session. Existing buffer views stay attached.
    pub(crate) fn reset(&mut self, technique: Technique) {
        self.technique = technique;
        self.state = ProtocolState::Idle;
        self.buffer.clear();
        self.malformed = 0;
        self.ignored = 0;
    }

    /// Technique this run uses
    pub fn technique(&self) -> Technique {
        self.technique
    }

    /// Current state
    pub fn current_state(&self) -> ProtocolState {
        self.state
    }

    /// Copy of the samples collected so far
    pub fn buffer_snapshot(&self) -> Vec<DataPoint> {
        self.buffer.snapshot()
    }

    /// Read-only view for other threads
    pub fn buffer_view(&self) -> BufferView {
        self.buffer.view()
    }

    /// Number of data lines that failed to parse
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    /// Number of events absorbed as no-ops
    pub fn ignored_count(&self) -> u64 {
        self.ignored
    }

    /// Record that the parameter command went out
    pub fn mark_parameters_sent(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            ProtocolState::Idle => {
                self.transition(ProtocolState::WaitingAck);
                Ok(())
            }
            state => Err(ProtocolError::InvalidTransition {
                state,
                action: "send parameters",
            }),
        }
    }

    /// Record that the start byte went out; only valid from `ParameterSet`
    pub fn mark_start_sent(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            ProtocolState::ParameterSet => {
                self.transition(ProtocolState::StartingTest);
                Ok(())
            }
            state => Err(ProtocolError::InvalidTransition {
                state,
                action: "start scan",
            }),
        }
    }

    /// Route the run to `Error` after a fatal transport or phase failure
    pub fn fail(&mut self, reason: &str) {
        if self.state != ProtocolState::Error {
            error!("Run failed in {}: {}", self.state, reason);
            self.transition(ProtocolState::Error);
        }
    }

    /// Apply one classified event
    pub fn submit(&mut self, event: ResponseEvent) {
        match (self.state, event) {
            (ProtocolState::WaitingAck, ResponseEvent::Ack) => {
                info!("Parameters acknowledged");
                self.transition(ProtocolState::ParameterSet);
            }
            (ProtocolState::StartingTest, ResponseEvent::StartConfirmed) => {
                info!("{} scan started, receiving data", self.technique);
                self.buffer.clear();
                self.transition(ProtocolState::ReceivingData);
            }
            (ProtocolState::ReceivingData, ResponseEvent::DataSample(point)) => {
                let count = self.buffer.push(point);
                if count % self.technique.progress_log_stride() == 0 {
                    debug!(
                        "Received {} data points (latest: V={:.4}V, I={:.4}uA)",
                        count, point.voltage, point.current
                    );
                }
            }
            (ProtocolState::ReceivingData, ResponseEvent::Complete) => {
                info!("{} scan complete, {} data points", self.technique, self.buffer.len());
                self.transition(ProtocolState::TestComplete);
            }
            (_, ResponseEvent::Malformed(raw)) => {
                self.malformed += 1;
                warn!("Invalid data format: {:?}", raw);
            }
            (state, ResponseEvent::Unknown(raw)) => {
                self.ignored += 1;
                debug!("Unknown response in {}: {:?}", state, raw);
            }
            (state, event) => {
                self.ignored += 1;
                debug!("Ignoring {:?} in {}", event, state);
            }
        }
    }

    fn transition(&mut self, next: ProtocolState) {
        debug!("State {} -> {}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(v: f64, i: f64) -> ResponseEvent {
        ResponseEvent::DataSample(DataPoint::new(v, i))
    }

    fn drive(machine: &mut StateMachine, events: &[ResponseEvent]) -> Vec<ProtocolState> {
        events
            .iter()
            .cloned()
            .map(|event| {
                machine.submit(event);
                machine.current_state()
            })
            .collect()
    }

    #[test]
    fn test_full_lifecycle() {
        let mut machine = StateMachine::new(Technique::Cv);
        assert_eq!(machine.current_state(), ProtocolState::Idle);

        machine.mark_parameters_sent().unwrap();
        assert_eq!(machine.current_state(), ProtocolState::WaitingAck);

        machine.submit(ResponseEvent::Ack);
        assert_eq!(machine.current_state(), ProtocolState::ParameterSet);

        machine.mark_start_sent().unwrap();
        machine.submit(ResponseEvent::StartConfirmed);
        assert_eq!(machine.current_state(), ProtocolState::ReceivingData);

        machine.submit(sample(-1.0, 2.5));
        machine.submit(sample(-0.9, 2.4));
        machine.submit(ResponseEvent::Complete);

        assert_eq!(machine.current_state(), ProtocolState::TestComplete);
        assert_eq!(
            machine.buffer_snapshot(),
            vec![DataPoint::new(-1.0, 2.5), DataPoint::new(-0.9, 2.4)]
        );
    }

    #[test]
    fn test_samples_outside_receiving_are_ignored() {
        let mut machine = StateMachine::new(Technique::Cv);
        machine.submit(sample(0.1, 0.1));
        machine.mark_parameters_sent().unwrap();
        machine.submit(sample(0.2, 0.2));
        machine.submit(ResponseEvent::Ack);
        machine.submit(sample(0.3, 0.3));

        assert!(machine.buffer_snapshot().is_empty());
        assert_eq!(machine.ignored_count(), 3);
    }

    #[test]
    fn test_redundant_ack_is_ignored() {
        let mut machine = StateMachine::new(Technique::Dpv);
        machine.mark_parameters_sent().unwrap();
        machine.submit(ResponseEvent::Ack);
        machine.submit(ResponseEvent::Ack);
        assert_eq!(machine.current_state(), ProtocolState::ParameterSet);
        assert_eq!(machine.ignored_count(), 1);
    }

    #[test]
    fn test_start_only_valid_from_parameter_set() {
        let mut machine = StateMachine::new(Technique::Cv);
        let err = machine.mark_start_sent().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidTransition {
                state: ProtocolState::Idle,
                ..
            }
        ));

        machine.mark_parameters_sent().unwrap();
        assert!(machine.mark_start_sent().is_err());
        assert!(machine.mark_parameters_sent().is_err());
    }

    #[test]
    fn test_malformed_never_touches_buffer() {
        let mut machine = StateMachine::new(Technique::Cv);
        machine.mark_parameters_sent().unwrap();
        machine.submit(ResponseEvent::Ack);
        machine.mark_start_sent().unwrap();
        machine.submit(ResponseEvent::StartConfirmed);
        machine.submit(ResponseEvent::Malformed("x,y,".to_string()));
        machine.submit(ResponseEvent::Unknown("BUSY".to_string()));

        assert_eq!(machine.current_state(), ProtocolState::ReceivingData);
        assert!(machine.buffer_snapshot().is_empty());
        assert_eq!(machine.malformed_count(), 1);
    }

    #[test]
    fn test_start_confirmed_clears_buffer() {
        let mut machine = StateMachine::new(Technique::Cv);
        machine.buffer.push(DataPoint::new(9.0, 9.0));
        machine.mark_parameters_sent().unwrap();
        machine.submit(ResponseEvent::Ack);
        machine.mark_start_sent().unwrap();
        machine.submit(ResponseEvent::StartConfirmed);
        assert!(machine.buffer_snapshot().is_empty());
    }

    #[test]
    fn test_terminal_states_absorb_events() {
        let mut machine = StateMachine::new(Technique::Dpv);
        machine.mark_parameters_sent().unwrap();
        machine.fail("link lost");
        assert_eq!(machine.current_state(), ProtocolState::Error);
        assert!(machine.current_state().is_terminal());

        machine.submit(ResponseEvent::Ack);
        machine.submit(ResponseEvent::StartConfirmed);
        assert_eq!(machine.current_state(), ProtocolState::Error);
    }

    #[test]
    fn test_reset_keeps_views_attached() {
        let mut machine = StateMachine::new(Technique::Cv);
        let view = machine.buffer_view();
        machine.mark_parameters_sent().unwrap();
        machine.fail("timeout");
        machine.buffer.push(DataPoint::new(1.0, 1.0));

        machine.reset(Technique::Dpv);
        assert_eq!(machine.current_state(), ProtocolState::Idle);
        assert_eq!(machine.technique(), Technique::Dpv);
        assert!(view.is_empty());

        machine.buffer.push(DataPoint::new(0.5, 0.5));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_transitions_are_deterministic() {
        let events = vec![
            ResponseEvent::Unknown("boot".to_string()),
            ResponseEvent::Ack,
            ResponseEvent::StartConfirmed,
            sample(0.0, 1.0),
            ResponseEvent::Complete,
            sample(0.1, 1.0),
        ];

        let run = || {
            let mut machine = StateMachine::new(Technique::Cv);
            machine.mark_parameters_sent().unwrap();
            let mut states = drive(&mut machine, &events[..2]);
            machine.mark_start_sent().unwrap();
            states.extend(drive(&mut machine, &events[2..]));
            (states, machine.buffer_snapshot())
        };

        let first = run();
        let second = run();
        assert_eq!(first, second);
        assert_eq!(
            first.0,
            vec![
                ProtocolState::WaitingAck,
                ProtocolState::ParameterSet,
                ProtocolState::ReceivingData,
                ProtocolState::ReceivingData,
                ProtocolState::TestComplete,
                ProtocolState::TestComplete,
            ]
        );
        assert_eq!(first.1.len(), 1);
    }
}
