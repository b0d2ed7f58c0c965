//! Deadlines, transport faults, cancellation and session lifecycle

mod common;

use common::ScriptedInstrument;
use echem_core::config::SimulatorConfig;
use echem_core::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn default_ack_timeout_is_five_seconds() {
    assert_eq!(RunConfig::default().ack_timeout(), Duration::from_secs(5));
}

#[test]
fn silent_instrument_times_out_waiting_for_ack() {
    let mut supervisor =
        RunSupervisor::with_transport(common::tight(150, 150, 1000), ScriptedInstrument::silent());
    let states = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&states);
    supervisor.on_progress(move |p| sink.lock().unwrap().push(p.state));

    let started = Instant::now();
    let err = supervisor.run(CvParameters::default()).unwrap_err();

    match err {
        ProtocolError::AckTimeout { elapsed } => assert!(elapsed >= Duration::from_millis(150)),
        other => panic!("expected AckTimeout, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(supervisor.state(), ProtocolState::Error);
    assert!(!states
        .lock()
        .unwrap()
        .contains(&ProtocolState::ParameterSet));
    assert!(!supervisor.is_connected());
}

#[test]
fn missing_start_confirmation_times_out() {
    let mut supervisor = RunSupervisor::with_transport(
        common::tight(500, 100, 1000),
        ScriptedInstrument::acking(&[]),
    );

    let err = supervisor.run(DpvParameters::default()).unwrap_err();

    assert!(matches!(err, ProtocolError::StartTimeout { .. }));
    assert!(err.is_timeout());
    assert_eq!(supervisor.state(), ProtocolState::Error);
}

#[test]
fn unfinished_scan_hits_run_timeout_and_keeps_state() {
    let mut supervisor = RunSupervisor::with_transport(
        common::tight(500, 500, 200),
        ScriptedInstrument::acking(&["*\r\n", "0.1000,2.0000,\r\n", "0.2000,2.1000,\r\n"]),
    );

    let err = supervisor.run(CvParameters::default()).unwrap_err();

    match err {
        ProtocolError::RunTimeout { elapsed, state } => {
            assert!(elapsed >= Duration::from_millis(200));
            assert_eq!(state, ProtocolState::ReceivingData);
        }
        other => panic!("expected RunTimeout, got {:?}", other),
    }
    assert_eq!(supervisor.state(), ProtocolState::ReceivingData);
    assert_eq!(supervisor.snapshot().len(), 2);
    assert!(!supervisor.is_connected());
}

#[test]
fn repeated_read_failures_abandon_the_run() {
    let mut supervisor =
        RunSupervisor::with_transport(common::tight(2000, 2000, 5000), ScriptedInstrument::broken());

    let started = Instant::now();
    let err = supervisor.run(CvParameters::default()).unwrap_err();

    match err {
        ProtocolError::TransportFailed { failures, .. } => assert_eq!(failures, 3),
        other => panic!("expected TransportFailed, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(supervisor.state(), ProtocolState::Error);
}

#[test]
fn chatty_instrument_is_tolerated() {
    let mut supervisor = RunSupervisor::with_transport(
        common::tight(500, 500, 2000),
        ScriptedInstrument {
            on_parameters: vec!["BOOT v1.2\r\n".into(), "#\r\n".into(), "#\r\n".into()],
            on_start: vec![
                "*\r\n".into(),
                "0.1000,2.0000,\r\n".into(),
                "abc,def,\r\n".into(),
                "\r\n".into(),
                "$\r\n".into(),
                "0.2000,2.5000,\r\n".into(),
                "@\r\n".into(),
            ],
            broken_reads: false,
        },
    );

    let report = supervisor.run(CvParameters::default()).unwrap();

    assert_eq!(
        report.points,
        vec![DataPoint::new(0.1, 2.0), DataPoint::new(0.2, 2.5)]
    );
    assert_eq!(report.counters.malformed_lines, 1);
    // banner, second ack, and the CV-foreign '$'
    assert_eq!(report.counters.ignored_events, 3);
}

#[test]
fn dpv_accepts_dollar_completion() {
    let mut supervisor = RunSupervisor::with_transport(
        common::tight(500, 500, 2000),
        ScriptedInstrument::acking(&["*\r\n", "0.1000,1.25,\r\n", "$\r\n"]),
    );

    let report = supervisor.run(DpvParameters::default()).unwrap();
    assert_eq!(report.final_state, ProtocolState::TestComplete);
    assert_eq!(report.points, vec![DataPoint::new(0.1, 1.25)]);
}

#[test]
fn cancel_handle_aborts_a_running_scan() {
    // real-time simulator: the CV window alone would take 20 s
    let mut supervisor = RunSupervisor::new(RunConfig::with_simulator(SimulatorConfig::default()));
    let cancel = supervisor.cancel_handle();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        cancel.cancel();
    });

    let started = Instant::now();
    let err = supervisor.run(CvParameters::default()).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, ProtocolError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(supervisor.state(), ProtocolState::Error);
    assert!(!supervisor.cancel_handle().is_cancelled());
}

#[test]
fn disconnect_twice_is_safe() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());
    supervisor.disconnect();
    supervisor.connect().unwrap();
    supervisor.disconnect();
    supervisor.disconnect();
    assert!(!supervisor.is_connected());
}

#[test]
fn second_connect_is_rejected() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());
    supervisor.connect().unwrap();
    assert!(matches!(
        supervisor.connect(),
        Err(ProtocolError::AlreadyConnected)
    ));
    supervisor.disconnect();
    supervisor.connect().unwrap();
}

#[test]
fn run_leaves_an_open_session_alone() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());
    supervisor.connect().unwrap();
    supervisor
        .send_parameters(&CvParameters::default().into())
        .unwrap();

    let err = supervisor.run(DpvParameters::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::AlreadyConnected));
    assert!(supervisor.is_connected());
    assert_eq!(supervisor.state(), ProtocolState::WaitingAck);
    assert_eq!(supervisor.counters().tx_commands, 1);

    supervisor.await_parameter_set().unwrap();
    assert_eq!(supervisor.state(), ProtocolState::ParameterSet);
    supervisor.disconnect();
}

#[test]
fn injected_simulator_with_zero_time_scale_is_rejected() {
    let sim = SimulatedInstrument::new(SimulatorConfig::accelerated(0.0));
    let mut supervisor = RunSupervisor::with_transport(common::tight(200, 200, 1000), sim);

    let err = supervisor.run(CvParameters::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidConfig(_)));
    assert_eq!(supervisor.state(), ProtocolState::Idle);
    assert!(!supervisor.is_connected());
}

#[test]
fn missing_port_fails_before_any_command() {
    let mut supervisor = RunSupervisor::new(RunConfig::default());
    let err = supervisor.run(CvParameters::default()).unwrap_err();

    assert!(matches!(err, ProtocolError::MissingAddress));
    assert_eq!(supervisor.state(), ProtocolState::Idle);
    assert_eq!(supervisor.counters().tx_commands, 0);
}

#[test]
fn invalid_parameters_never_reach_the_wire() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());
    let params = CvParameters {
        scan_rate: -0.1,
        ..Default::default()
    };

    let err = supervisor.run(params).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidParameters(_)));
    assert_eq!(supervisor.counters().tx_commands, 0);
}
