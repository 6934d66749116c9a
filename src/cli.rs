//! # CLI — Argument Surface and Startup Validation
//!
//! Enumerates the detector's command-line options and performs the
//! configuration-error checks that must happen before any worker is
//! spawned: invalid statistical parameters or a missing device path are
//! fatal here, printed to stderr, nonzero exit — everything past this
//! point is the coordinator's problem.

use crate::coordinator::{self, CoordinatorConfig, SourceKind};
use crate::utils::iso_now;
use crate::worker::WorkerConfig;
use anyhow::{bail, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

/// Online anomaly detector for /dev/(u)random-style bit streams (RCT, APT,
/// SPRT, optional Z-test).
#[derive(Parser)]
#[command(name = "biasguard", about = "Online anomaly detector for raw bit streams")]
pub struct Cli {
    /// Device path to read bits from (ignored if --synthetic)
    #[arg(long, default_value = "/dev/urandom")]
    pub source: PathBuf,

    /// Number of parallel worker threads (default: logical core count)
    #[arg(long)]
    pub processes: Option<usize>,

    /// False-positive rate for RCT/APT/SPRT
    #[arg(long, default_value_t = 1e-6)]
    pub alpha: f64,

    /// SPRT false-negative rate
    #[arg(long, default_value_t = 1e-2)]
    pub beta: f64,

    /// SPRT minimum detectable bias around p=0.5
    #[arg(long, default_value_t = 1e-4)]
    pub delta: f64,

    /// APT sliding window size
    #[arg(long, default_value_t = 1024)]
    pub apt_window: u64,

    /// Optional per-worker bit limit
    #[arg(long)]
    pub bits: Option<u64>,

    /// Per-worker time limit in seconds
    #[arg(long, default_value_t = 30.0)]
    pub time: f64,

    /// Device read chunk size in bytes
    #[arg(long, default_value_t = 1 << 16)]
    pub chunk: usize,

    /// Coordinator heartbeat period in seconds
    #[arg(long, default_value_t = 0.5)]
    pub live_interval: f64,

    /// Terminate all workers at the first anomaly event
    #[arg(long, default_value_t = false)]
    pub stop_on_anomaly: bool,

    /// Emit an ITER event every `iter_sample` bits (high volume)
    #[arg(long, default_value_t = false)]
    pub per_iter: bool,

    /// Sample 1 out of N bits when --per-iter is set
    #[arg(long, default_value_t = 1)]
    pub iter_sample: u64,

    /// Ignore --bits and --time; run indefinitely
    #[arg(long, default_value_t = false)]
    pub no_limit: bool,

    /// Suppress heartbeat/stats/iter JSON records for a clean summary-only stream
    #[arg(long, default_value_t = false)]
    pub quiet_json: bool,

    /// Use a synthetic Bernoulli(p) source instead of the device
    #[arg(long, default_value_t = false)]
    pub synthetic: bool,

    /// P(bit=1) for the synthetic source
    #[arg(long, default_value_t = 0.5)]
    pub p: f64,

    /// Base seed for the synthetic source (derived from the clock if unset)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Enable the bilateral online monobit Z-test
    #[arg(long, default_value_t = false)]
    pub ztest: bool,

    /// Bilateral alpha for the Z-test (defaults to --alpha)
    #[arg(long)]
    pub z_alpha: Option<f64>,

    /// Minimum bits before evaluating the Z-test
    #[arg(long, default_value_t = 10_000)]
    pub z_min_bits: u64,

    /// Write Prometheus text-exposition metrics to this path on every
    /// heartbeat, textfile-collector style (written atomically)
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

fn validate(cli: &Cli) -> Result<()> {
    if !(0.0 < cli.alpha && cli.alpha < 1.0) {
        bail!("--alpha must be in (0,1), got {}", cli.alpha);
    }
    if !(0.0 < cli.beta && cli.beta < 1.0) {
        bail!("--beta must be in (0,1), got {}", cli.beta);
    }
    if !(0.0 < cli.delta && cli.delta < 0.5) {
        bail!("--delta must be in (0,0.5), got {}", cli.delta);
    }
    if cli.apt_window == 0 {
        bail!("--apt-window must be > 0");
    }
    if cli.iter_sample == 0 {
        bail!("--iter-sample must be >= 1");
    }
    if let Some(z_alpha) = cli.z_alpha {
        if !(0.0 < z_alpha && z_alpha < 1.0) {
            bail!("--z-alpha must be in (0,1), got {z_alpha}");
        }
    }
    if cli.z_min_bits == 0 {
        bail!("--z-min-bits must be > 0");
    }
    if cli.synthetic {
        if !(0.0..=1.0).contains(&cli.p) {
            bail!("--p must be in [0,1], got {}", cli.p);
        }
    } else if !cli.source.exists() {
        bail!("device path does not exist: {}", cli.source.display());
    }
    Ok(())
}

/// Validates configuration, prints the startup `config` record, and runs
/// the coordinator to completion.
pub fn run(mut cli: Cli) -> Result<()> {
    validate(&cli)?;

    if cli.no_limit {
        cli.bits = None;
    }
    let max_seconds = if cli.no_limit { None } else { Some(cli.time) };

    let processes = cli
        .processes
        .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

    if !cli.quiet_json {
        println!(
            "{}",
            json!({
                "ts": iso_now(),
                "config": {
                    "source": cli.source.display().to_string(),
                    "processes": processes,
                    "alpha": cli.alpha,
                    "beta": cli.beta,
                    "delta": cli.delta,
                    "apt_window": cli.apt_window,
                    "bits_limit": cli.bits,
                    "time_limit_sec": max_seconds,
                    "chunk_bytes": cli.chunk,
                    "live_interval_sec": cli.live_interval,
                    "stop_on_anomaly": cli.stop_on_anomaly,
                    "per_iter": cli.per_iter,
                    "iter_sample": cli.iter_sample,
                    "quiet_json": cli.quiet_json,
                    "no_limit": cli.no_limit,
                    "synthetic": cli.synthetic,
                    "p": cli.p,
                    "seed": cli.seed,
                    "ztest": cli.ztest,
                    "z_alpha": cli.z_alpha,
                    "z_min_bits": cli.z_min_bits,
                    "metrics_file": cli.metrics_file.as_ref().map(|p| p.display().to_string()),
                }
            })
        );
    }

    let source = if cli.synthetic {
        SourceKind::Synthetic { p: cli.p, seed: cli.seed }
    } else {
        SourceKind::Device { path: cli.source.clone(), chunk_size: cli.chunk }
    };

    let worker = WorkerConfig {
        alpha: cli.alpha,
        beta: cli.beta,
        delta: cli.delta,
        apt_window: cli.apt_window,
        max_bits: cli.bits,
        max_seconds,
        report_interval: cli.live_interval,
        stop_on_anomaly: cli.stop_on_anomaly,
        per_iter: cli.per_iter,
        iter_sample: cli.iter_sample,
        ztest_enabled: cli.ztest,
        z_alpha: cli.z_alpha,
        z_min_bits: cli.z_min_bits,
    };

    info!(processes, "biasguard starting");

    coordinator::run(CoordinatorConfig {
        processes,
        source,
        worker,
        live_interval: cli.live_interval,
        quiet_json: cli.quiet_json,
        metrics_file: cli.metrics_file,
    })
}
