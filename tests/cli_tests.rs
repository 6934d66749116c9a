//! CLI integration tests for the `biasguard` binary.
//!
//! These tests exercise the command-line interface using `assert_cmd`, which
//! spawns the compiled binary as a subprocess and asserts on exit code,
//! stdout, and stderr. All scenarios use the synthetic Bernoulli source so no
//! device access is required.
//!
//! # How to run
//!
//! ```bash
//! cargo test --test cli_tests
//! ```

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::io::Write;

#[allow(deprecated)]
fn biasguard() -> Command {
    Command::cargo_bin("biasguard").unwrap()
}

fn parse_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("every stdout line must be valid JSON"))
        .collect()
}

// == Configuration validation ====================================================

/// An out-of-range alpha must be rejected before any worker spawns, with a
/// nonzero exit and a message on stderr.
#[test]
fn rejects_alpha_out_of_range() {
    biasguard()
        .args(["--synthetic", "--alpha", "1.5", "--bits", "10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("alpha"));
}

/// A device path that does not exist is a fatal startup error.
#[test]
fn rejects_nonexistent_device_path() {
    biasguard()
        .args(["--source", "/nonexistent/biasguard/device/path", "--bits", "10"])
        .assert()
        .failure();
}

// == Synthetic source scenarios ==================================================

/// A fair synthetic stream (p=0.5) over a modest bit count should complete
/// cleanly and emit a final summary with zero or very few anomalies.
#[test]
fn synthetic_fair_stream_completes_with_summary() {
    let output = biasguard()
        .args([
            "--synthetic",
            "--p",
            "0.5",
            "--seed",
            "42",
            "--bits",
            "200000",
            "--processes",
            "1",
            "--quiet-json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let lines = parse_lines(&output.stdout);
    assert!(lines.iter().any(|v| v.get("summary").is_some()));
}

/// An all-zero synthetic stream (p=0.0) must trigger an RCT anomaly well
/// before the bit limit, and --stop-on-anomaly must halt the worker early.
#[test]
fn synthetic_all_zero_stream_triggers_rct_and_stops() {
    let output = biasguard()
        .args([
            "--synthetic",
            "--p",
            "0.0",
            "--seed",
            "1",
            "--bits",
            "100000",
            "--processes",
            "1",
            "--stop-on-anomaly",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let lines = parse_lines(&output.stdout);
    let anomaly = lines.iter().find(|v| v.get("event").and_then(|e| e.as_str()) == Some("ANOMALY"));
    assert!(anomaly.is_some(), "expected an ANOMALY event on an all-zero stream");
    assert_eq!(anomaly.unwrap()["test"], "RCT");
}

/// A strongly biased stream (p=0.9) must trigger a SPRT anomaly.
#[test]
fn synthetic_biased_stream_triggers_sprt() {
    let output = biasguard()
        .args([
            "--synthetic",
            "--p",
            "0.9",
            "--seed",
            "7",
            "--bits",
            "200000",
            "--processes",
            "1",
            "--delta",
            "0.05",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let lines = parse_lines(&output.stdout);
    let saw_sprt = lines.iter().any(|v| {
        v.get("event").and_then(|e| e.as_str()) == Some("ANOMALY")
            && v.get("test").and_then(|t| t.as_str()) == Some("SPRT")
    });
    assert!(saw_sprt, "expected a SPRT anomaly on a strongly biased stream");
}

/// Multiple worker processes must each report their own proc_id, and the
/// final summary's total bit count must equal processes * bits.
#[test]
fn multiple_processes_report_independently() {
    let output = biasguard()
        .args([
            "--synthetic",
            "--p",
            "0.5",
            "--seed",
            "3",
            "--bits",
            "50000",
            "--processes",
            "4",
            "--quiet-json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let lines = parse_lines(&output.stdout);
    let summary = lines
        .iter()
        .find(|v| v.get("summary").is_some())
        .expect("expected a summary record");
    let total_bits = summary["summary"]["total_bits"].as_u64().unwrap();
    assert_eq!(total_bits, 50_000 * 4);
}

/// The online Z-test, when enabled, must stay silent before `z_min_bits` and
/// may fire after, without crashing the run.
#[test]
fn z_test_respects_min_bits() {
    let output = biasguard()
        .args([
            "--synthetic",
            "--p",
            "0.5",
            "--seed",
            "9",
            "--bits",
            "20000",
            "--processes",
            "1",
            "--ztest",
            "--z-min-bits",
            "15000",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
}

/// `--metrics-file` must produce a readable Prometheus text-exposition file
/// once the run completes (the heartbeat cadence writes it at least once).
#[test]
fn metrics_file_is_written_when_requested() {
    let dir = tempfile::tempdir().unwrap();
    let metrics_path = dir.path().join("biasguard.prom");

    let output = biasguard()
        .args([
            "--synthetic",
            "--p",
            "0.0",
            "--seed",
            "1",
            "--bits",
            "100000",
            "--processes",
            "1",
            "--stop-on-anomaly",
            "--live-interval",
            "0.0",
            "--metrics-file",
            metrics_path.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let contents = std::fs::read_to_string(&metrics_path).unwrap();
    assert!(contents.contains("biasguard_anomalies"));
}

// == Device source, LSB bit ordering =============================================

/// A device-style source must extract bits least-significant-bit first: the
/// byte 0x01 must yield [1,0,0,0,0,0,0,0], so the very first bit read is a 1
/// and the final ones count over all 8 bits is exactly 1.
#[test]
fn device_source_extracts_bits_lsb_first() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0x01]).unwrap();
    let path = file.path().to_path_buf();

    let output = biasguard()
        .args([
            "--source",
            path.to_str().unwrap(),
            "--bits",
            "8",
            "--processes",
            "1",
            "--per-iter",
            "--iter-sample",
            "1",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let lines = parse_lines(&output.stdout);

    let first_iter = lines
        .iter()
        .find(|v| v.get("event").and_then(|e| e.as_str()) == Some("ITER"))
        .expect("expected at least one ITER event");
    assert_eq!(first_iter["bits_processed"], 1);
    assert_eq!(first_iter["ones_total"], 1, "the first bit of 0x01 must be 1 (LSB-first)");

    let done = lines
        .iter()
        .find(|v| v.get("event").and_then(|e| e.as_str()) == Some("DONE"))
        .expect("expected a DONE event");
    assert_eq!(done["bits_processed"], 8);
    assert_eq!(done["ones_total"], 1, "only one set bit across the whole byte 0x01");
}
