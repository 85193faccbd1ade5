use std::process::{Command, Output};

use tempfile::tempdir;

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_v2x_safety"))
        .args(args)
        .env("RUST_LOG", "warn,v2x_safety=info")
        .output()
        .expect("Failed to execute v2x_safety")
}

/// Test that a short headless run completes and logs its summary
#[test]
fn test_short_run_completes() {
    let output = run_cli(&["--duration", "10", "--vehicles", "8"]);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        output.status.success(),
        "Run failed. stderr: {}",
        stderr
    );
    assert!(
        stderr.contains("RUN COMPLETE"),
        "Run did not complete properly. stderr: {}",
        stderr
    );
    assert!(
        stderr.contains("Total ticks: 50"),
        "Missing tick count. stderr: {}",
        stderr
    );
    assert!(
        stdout.contains("=== V2X Safety Report ==="),
        "Missing report. stdout: {}",
        stdout
    );
    assert!(stdout.contains("Status: Completed"));
}

/// Test that the JSON report is written and carries the summary
#[test]
fn test_json_report_is_written() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("report.json");
    let output = run_cli(&[
        "--duration",
        "10",
        "--vehicles",
        "8",
        "--report",
        path.to_str().expect("utf-8 path"),
    ]);
    assert!(
        output.status.success(),
        "Run failed. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let raw = std::fs::read_to_string(&path).expect("report written");
    let report: serde_json::Value = serde_json::from_str(&raw).expect("valid JSON");
    assert_eq!(report["summary"]["total_ticks"], 50);
    assert_eq!(report["summary"]["status"], "completed");
    assert_eq!(report["score_history"].as_array().map(Vec::len), Some(50));
}

/// Test that a missing config file fails the run up front
#[test]
fn test_bad_config_path_fails() {
    let output = run_cli(&["--config", "/nonexistent/engine.json", "--duration", "1"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Failed to read config file"),
        "Unexpected error. stderr: {}",
        stderr
    );
}
