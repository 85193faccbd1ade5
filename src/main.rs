use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use v2x_safety::demo::{DemoSettings, GridSimulator};
use v2x_safety::engine::{
    CoordinationLoop, EngineConfig, EventKind, LogSink, LoopState, RunReport, RunStatus,
    SnapshotReader,
};

#[derive(Parser)]
#[command(name = "v2x_safety")]
#[command(about = "V2X safety coordination over a headless grid simulation")]
struct Cli {
    /// Simulated run length in seconds
    #[arg(long, default_value = "150")]
    duration: f64,

    /// Time delta per tick in seconds
    #[arg(long, default_value = "0.2")]
    delta: f64,

    /// Seed for the demo traffic
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Number of vehicles kept on the grid
    #[arg(long, default_value = "20")]
    vehicles: usize,

    /// Engine configuration (JSON); the built-in grid preset when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the full run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Fraction of snapshot entries reported without a position
    #[arg(long, default_value = "0.0")]
    malformed_rate: f64,

    /// Print a live status line every N milliseconds (0 disables)
    #[arg(long, default_value = "0")]
    dashboard_ms: u64,

    /// Per-tick debug logging
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "warn,v2x_safety=debug"
    } else {
        "warn,v2x_safety=info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::grid_preset(),
    };
    info!(
        "Running {:.0}s at {}s per tick with {} vehicles (seed {})",
        cli.duration, cli.delta, cli.vehicles, cli.seed
    );

    let settings = DemoSettings {
        duration_secs: cli.duration,
        delta_secs: cli.delta,
        target_vehicles: cli.vehicles,
        malformed_rate: cli.malformed_rate,
        seed: cli.seed,
        ..DemoSettings::default()
    };
    let rsus = config.build_rsus();
    let simulator = GridSimulator::new(settings)?.with_signals(&rsus);
    let mut engine = CoordinationLoop::new(config, simulator)
        .context("Invalid engine configuration")?
        .with_sink(LogSink);

    let dashboard = (cli.dashboard_ms > 0).then(|| {
        let reader = engine.snapshot_reader();
        let interval = Duration::from_millis(cli.dashboard_ms);
        thread::spawn(move || run_dashboard(reader, interval))
    });

    let report = engine.run();

    if let Some(handle) = dashboard {
        let _ = handle.join();
    }

    engine.simulator().print_summary();
    println!();
    print_report(&report);

    if let Some(path) = &cli.report {
        report.write_json(path)?;
        info!("Report written to {}", path.display());
    }

    if report.summary.status == RunStatus::Fatal {
        bail!(
            "run aborted after {} failed ticks",
            report.summary.failed_ticks
        );
    }
    Ok(())
}

/// Poll the engine's published snapshot until the run stops
fn run_dashboard(reader: SnapshotReader, interval: Duration) {
    loop {
        thread::sleep(interval);
        let Some(snapshot) = reader.latest() else {
            continue;
        };
        println!(
            "[tick {:>5}] {:?} vehicles={} advisories={} score={:.1} (trend {:+.1}) events={}",
            snapshot.metrics.tick,
            snapshot.state,
            snapshot.metrics.live_vehicle_count,
            snapshot.metrics.active_advisories,
            snapshot.score.current,
            snapshot.score.trend,
            snapshot.total_events
        );
        if let LoopState::Stopped(_) = snapshot.state {
            break;
        }
    }
}

fn print_report(report: &RunReport) {
    let summary = &report.summary;
    println!("=== V2X Safety Report ===");
    println!("Status: {:?}", summary.status);
    println!(
        "Ticks: {} ({} failed), vehicles seen: {}",
        summary.total_ticks, summary.failed_ticks, summary.vehicles_seen
    );
    println!(
        "Safety score: {:.1} (min {:.1}, max {:.1})",
        summary.final_score, summary.min_score, summary.max_score
    );

    println!("--- Risk events ---");
    for (severity, count) in &summary.event_counts_by_severity {
        println!("  {:<8} {}", severity.as_str(), count);
    }

    println!("--- Advisories applied ---");
    for (kind, count) in &summary.advisory_counts_by_kind {
        println!("  {:<13} {}", kind.as_str(), count);
    }

    let malformed = report
        .events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::MalformedInput { .. }))
        .count();
    let unknown = report
        .events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::UnknownEntity { .. }))
        .count();
    let degraded = report
        .events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::DegradedPerformance { .. }))
        .count();
    println!("--- Data quality ---");
    println!("  malformed entries  {}", malformed);
    println!("  unknown targets    {}", unknown);
    println!("  slow ticks         {}", degraded);

    let worst = report
        .events
        .iter()
        .filter(|e| e.is_adverse())
        .max_by_key(|e| (e.severity, std::cmp::Reverse(e.id)));
    if let Some(event) = worst {
        let entities: Vec<String> = event.entities.iter().map(|e| e.to_string()).collect();
        println!(
            "First worst risk: tick {} {} [{}]",
            event.tick,
            event.severity,
            entities.join(", ")
        );
    }
}
