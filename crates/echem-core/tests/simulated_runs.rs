//! End-to-end runs against the simulated instrument

mod common;

use echem_core::config::SimulatorConfig;
use echem_core::prelude::*;
use pretty_assertions::assert_eq;

#[test]
fn cv_run_completes_within_bounds() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());
    let params = CvParameters {
        start_v: -1.0,
        end_v: 1.0,
        scan_direction: ScanDirection::Forward,
        scan_rate: 0.2,
        cycles: 2,
        current_range: 50,
    };

    let report = supervisor.run(params).unwrap();

    assert_eq!(report.final_state, ProtocolState::TestComplete);
    assert_eq!(report.technique, Technique::Cv);
    assert_eq!(report.points.len(), 320);
    for point in &report.points {
        assert!(
            (-1.0..=1.0).contains(&point.voltage),
            "voltage out of range: {:?}",
            point
        );
    }
    assert!(!supervisor.is_connected());
}

#[test]
fn dpv_run_sweeps_once() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());
    let params = DpvParameters {
        start_v: -1.0,
        end_v: 1.0,
        pulse_height: 0.1,
        pulse_width_ms: 10,
        pulse_period_ms: 10,
        sample_width_ms: 20,
        cycles: 2,
        current_range: 50,
        ..Default::default()
    };

    let report = supervisor.run(params).unwrap();

    assert_eq!(report.final_state, ProtocolState::TestComplete);
    assert!(
        (240..=260).contains(&report.points.len()),
        "got {} samples",
        report.points.len()
    );
    assert!(report
        .points
        .windows(2)
        .all(|w| w[1].voltage >= w[0].voltage));

    let peak = report
        .points
        .iter()
        .max_by(|a, b| a.current.total_cmp(&b.current))
        .unwrap();
    assert!((peak.voltage - 0.3).abs() < 0.1);
}

#[test]
fn same_seed_gives_same_curve() {
    let run = || {
        RunSupervisor::new(common::fast_simulated())
            .run(DpvParameters::default())
            .unwrap()
            .points
    };
    assert_eq!(run(), run());
}

#[test]
fn peak_center_is_configurable() {
    let mut config = common::fast_simulated();
    config.transport = TransportSelection::Simulated(SimulatorConfig {
        time_scale: 500.0,
        poll_interval_ms: 10,
        peak_center_v: -0.4,
        ..Default::default()
    });

    let report = RunSupervisor::new(config).run(DpvParameters::default()).unwrap();
    let peak = report
        .points
        .iter()
        .max_by(|a, b| a.current.total_cmp(&b.current))
        .unwrap();
    assert!((peak.voltage + 0.4).abs() < 0.1);
}

#[test]
fn supervisor_can_run_back_to_back() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());

    let first = supervisor.run(DpvParameters::default()).unwrap();
    let second = supervisor.run(CvParameters::default()).unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.technique, Technique::Dpv);
    assert_eq!(second.technique, Technique::Cv);
    assert_eq!(second.points.len(), 320);
}

#[test]
fn buffer_view_observes_live_run() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());
    let view = supervisor.buffer_view();

    let report = supervisor.run(DpvParameters::default()).unwrap();

    assert_eq!(view.len(), report.points.len());
    assert_eq!(view.last(), report.points.last().copied());
}

#[test]
fn report_serializes_to_json() {
    let mut supervisor = RunSupervisor::new(common::fast_simulated());
    let report = supervisor.run(DpvParameters::default()).unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["technique"], "dpv");
    assert_eq!(json["final_state"], "TestComplete");
    assert_eq!(json["parameters"]["technique"], "dpv");
    assert_eq!(
        json["points"].as_array().map(Vec::len),
        Some(report.points.len())
    );
}
