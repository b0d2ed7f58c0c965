//! Run one scan and print the samples as CSV.
//!
//! Usage: run_scan <cv|dpv> [port|--sim] [config.json]
//!        run_scan --list

use anyhow::{bail, Context, Result};
use echem_core::prelude::*;
use echem_core::protocol::list_ports;
use std::env;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--list") {
        for port in list_ports() {
            println!(
                "{}\t{}",
                port.name,
                port.product.as_deref().unwrap_or("(unknown device)")
            );
        }
        return Ok(());
    }

    let params: TechniqueParameters = match args.first().map(String::as_str) {
        Some("cv") => CvParameters::default().into(),
        Some("dpv") => DpvParameters::default().into(),
        _ => bail!("Usage: run_scan <cv|dpv> [port|--sim] [config.json]"),
    };

    let mut config = match args.get(2) {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path))?;
            RunConfig::from_json(&text)?
        }
        None => RunConfig::simulated(),
    };
    match args.get(1).map(String::as_str) {
        None => {}
        Some("--sim") => config.use_simulator(),
        Some(port) => config.transport = TransportSelection::Serial(SerialSettings::for_port(port)),
    }

    let mut supervisor = RunSupervisor::new(config);
    supervisor.on_progress(|p| eprintln!("[{:>3}%] {}", p.percent, p.status));

    let report = supervisor.run(params)?;
    println!("voltage,current");
    for point in &report.points {
        println!("{:.4},{:.4}", point.voltage, point.current);
    }
    eprintln!(
        "{} run {}: {} samples, {} malformed lines",
        report.technique,
        report.run_id,
        report.points.len(),
        report.counters.malformed_lines
    );
    Ok(())
}
