//! # Coordinator — Multiplexes Workers, Aggregates, Reports
//!
//! Spawns N workers (OS threads, each owning its own bit source and test
//! state exclusively), drains their shared event channel with a bounded
//! poll, and aggregates per-process counters into heartbeats and a final
//! summary. Single-threaded, the sole consumer of the channel.
//!
//! The original Python implementation has a STATS-branch heartbeat path
//! that calls the misspelled `time.perfCounter()` and would crash on first
//! use (see `DESIGN.md`). That branch's *intended* behavior — "emit a
//! heartbeat if `live_interval` has elapsed" — is unified here with the
//! poll-timeout heartbeat path via `maybe_emit_heartbeat`; no misspelling is
//! reproduced.

use crate::metrics::Metrics;
use crate::sources::{derive_process_seed, BitSource, DeviceBitSource, SyntheticBitSource};
use crate::utils::{human_bps, iso_now};
use crate::worker::{run_worker, WorkerConfig, WorkerEvent};
use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Which kind of bit source every worker should open.
#[derive(Clone)]
pub enum SourceKind {
    Device { path: PathBuf, chunk_size: usize },
    Synthetic { p: f64, seed: Option<u64> },
}

/// Top-level run configuration, one per process invocation.
#[derive(Clone)]
pub struct CoordinatorConfig {
    pub processes: usize,
    pub source: SourceKind,
    pub worker: WorkerConfig,
    pub live_interval: f64,
    pub quiet_json: bool,
    pub metrics_file: Option<PathBuf>,
}

#[derive(Default, Clone)]
struct PerProcStats {
    bps: f64,
    bits: u64,
    ones: u64,
    apt_len: u64,
    apt_ones: u64,
}

/// Aggregated counters the coordinator maintains across all workers.
#[derive(Default)]
struct Aggregate {
    per_proc: HashMap<usize, PerProcStats>,
    anomalies: u64,
}

impl Aggregate {
    fn bits_total(&self) -> u64 {
        self.per_proc.values().map(|p| p.bits).sum()
    }
    fn ones_total(&self) -> u64 {
        self.per_proc.values().map(|p| p.ones).sum()
    }
    fn apt_len_total(&self) -> u64 {
        self.per_proc.values().map(|p| p.apt_len).sum()
    }
    fn apt_ones_total(&self) -> u64 {
        self.per_proc.values().map(|p| p.apt_ones).sum()
    }
    fn aggregate_bps(&self) -> f64 {
        self.per_proc.values().map(|p| p.bps).sum()
    }
}

fn emit(quiet: bool, value: serde_json::Value) {
    if quiet {
        return;
    }
    println!("{}", value);
}

/// Serializes `payload` and tags it with `ts` and `event`, matching the
/// one-JSON-object-per-line event sink format.
fn event_line(tag: &str, payload: &impl Serialize) -> serde_json::Value {
    let mut value = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.insert("ts".to_string(), json!(iso_now()));
        obj.insert("event".to_string(), json!(tag));
    }
    value
}

fn heartbeat_payload(agg: &Aggregate, elapsed: f64) -> serde_json::Value {
    let bits_total = agg.bits_total();
    let ones_total = agg.ones_total();
    let ones_ratio = if bits_total > 0 {
        Some(ones_total as f64 / bits_total as f64)
    } else {
        None
    };
    let window_len_total = agg.apt_len_total();
    let window_ones_total = agg.apt_ones_total();
    let window_ratio = if window_len_total > 0 {
        Some(window_ones_total as f64 / window_len_total as f64)
    } else {
        None
    };
    let agg_bps = agg.aggregate_bps();
    json!({
        "ts": iso_now(),
        "heartbeat": true,
        "elapsed_sec": elapsed,
        "procs_reporting": agg.per_proc.len(),
        "bits_total": bits_total,
        "ones_total": ones_total,
        "ones_ratio_global": ones_ratio,
        "ones_percent_global": ones_ratio.map(|r| r * 100.0),
        "window_len_total": window_len_total,
        "window_ones_total": window_ones_total,
        "ones_ratio_window": window_ratio,
        "ones_percent_window": window_ratio.map(|r| r * 100.0),
        "aggregate_bps": agg_bps,
        "aggregate_bps_human": human_bps(agg_bps),
    })
}

/// Writes the current metrics snapshot to `path` atomically (write to a
/// `.tmp` sibling, then rename), the textfile-collector convention for
/// processes with no scrape endpoint of their own. Failures are logged and
/// otherwise ignored — metrics export never affects a run.
fn write_metrics_file(path: &std::path::Path, metrics: &Metrics) {
    let tmp = path.with_extension("tmp");
    if let Err(e) = std::fs::write(&tmp, metrics.encode()) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write metrics file");
        return;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to publish metrics file");
    }
}

#[allow(clippy::too_many_arguments)]
fn maybe_emit_heartbeat(
    agg: &Aggregate,
    metrics: &Metrics,
    quiet: bool,
    live_interval: f64,
    t_start: Instant,
    last_hb: &mut Instant,
    metrics_file: Option<&std::path::Path>,
) {
    if last_hb.elapsed().as_secs_f64() < live_interval {
        return;
    }
    let elapsed = t_start.elapsed().as_secs_f64();
    emit(quiet, heartbeat_payload(agg, elapsed));
    metrics.set_aggregate_bps(agg.aggregate_bps());
    if let Some(path) = metrics_file {
        write_metrics_file(path, metrics);
    }
    *last_hb = Instant::now();
}

fn open_source(kind: &SourceKind, proc_id: usize) -> Result<Box<dyn BitSource + Send>> {
    match kind {
        SourceKind::Device { path, chunk_size } => {
            Ok(Box::new(DeviceBitSource::open(path, *chunk_size)?))
        }
        SourceKind::Synthetic { p, seed } => {
            let seed_eff = derive_process_seed(*seed, proc_id as u64);
            Ok(Box::new(SyntheticBitSource::new(*p, seed_eff)?))
        }
    }
}

/// Runs the full pipeline: spawns workers, drains events, emits heartbeats
/// and a final summary. Returns an error only for startup failures before
/// any worker began (e.g. the first worker's source failed to open);
/// per-worker runtime failures surface as `Error` events instead.
pub fn run(cfg: CoordinatorConfig) -> Result<()> {
    let metrics = Metrics::new();
    let (tx, rx) = mpsc::sync_channel::<WorkerEvent>(4096);
    let stop_flag = Arc::new(AtomicBool::new(false));

    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(cfg.processes);
    for proc_id in 0..cfg.processes {
        let source = open_source(&cfg.source, proc_id)?;
        let worker_cfg = cfg.worker.clone();
        let tx = tx.clone();
        let stop = Arc::clone(&stop_flag);
        handles.push(std::thread::spawn(move || {
            run_worker(proc_id, source, worker_cfg, tx, stop);
        }));
    }
    drop(tx);

    info!(processes = cfg.processes, "coordinator starting");

    let mut agg = Aggregate::default();
    let mut active = cfg.processes;
    let t_start = Instant::now();
    let mut last_hb = t_start;
    let poll_timeout = Duration::from_millis(500);

    while active > 0 {
        match rx.recv_timeout(poll_timeout) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                maybe_emit_heartbeat(
                    &agg,
                    &metrics,
                    cfg.quiet_json,
                    cfg.live_interval,
                    t_start,
                    &mut last_hb,
                    cfg.metrics_file.as_deref(),
                );
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Ok(WorkerEvent::Anomaly(a)) => {
                agg.anomalies += 1;
                agg.per_proc.insert(
                    a.proc_id,
                    PerProcStats {
                        bps: a.bps,
                        bits: a.bits_processed,
                        ones: a.ones_total,
                        apt_len: a.apt_len,
                        apt_ones: a.apt_ones,
                    },
                );
                metrics.record_anomaly(a.kind.test_name());
                emit(cfg.quiet_json, event_line("ANOMALY", &a));
                if cfg.worker.stop_on_anomaly {
                    stop_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
            Ok(WorkerEvent::Stats(s)) => {
                agg.per_proc.insert(
                    s.proc_id,
                    PerProcStats {
                        bps: s.bps,
                        bits: s.bits_processed,
                        ones: s.ones_total,
                        apt_len: s.apt_len,
                        apt_ones: s.apt_ones,
                    },
                );
                maybe_emit_heartbeat(
                    &agg,
                    &metrics,
                    cfg.quiet_json,
                    cfg.live_interval,
                    t_start,
                    &mut last_hb,
                    cfg.metrics_file.as_deref(),
                );
            }
            Ok(WorkerEvent::Iter(it)) => {
                let entry = agg.per_proc.entry(it.proc_id).or_default();
                entry.bits = it.bits_processed;
                entry.ones = it.ones_total;
                emit(cfg.quiet_json, event_line("ITER", &it));
            }
            Ok(WorkerEvent::Done(s)) => {
                agg.per_proc.insert(
                    s.proc_id,
                    PerProcStats {
                        bps: s.bps,
                        bits: s.bits_processed,
                        ones: s.ones_total,
                        apt_len: s.apt_len,
                        apt_ones: s.apt_ones,
                    },
                );
                emit(cfg.quiet_json, event_line("DONE", &s));
                active -= 1;
            }
            Ok(WorkerEvent::Error { proc_id, message }) => {
                error!(proc_id, %message, "worker error");
                #[derive(Serialize)]
                struct ErrorPayload {
                    proc_id: usize,
                    message: String,
                }
                emit(
                    cfg.quiet_json,
                    event_line("ERROR", &ErrorPayload { proc_id, message }),
                );
                active -= 1;
            }
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    let elapsed = t_start.elapsed().as_secs_f64();
    let bits_total = agg.bits_total();
    let ones_total = agg.ones_total();
    emit(
        cfg.quiet_json,
        json!({
            "ts": iso_now(),
            "summary": {
                "elapsed_sec": elapsed,
                "processes": cfg.processes,
                "anomalies": agg.anomalies,
                "total_bits": bits_total,
                "ones_total": ones_total,
                "ones_ratio_global": if bits_total > 0 { Some(ones_total as f64 / bits_total as f64) } else { None },
                "aggregate_bps": agg.aggregate_bps(),
                "aggregate_bps_human": human_bps(agg.aggregate_bps()),
            }
        }),
    );

    Ok(())
}
