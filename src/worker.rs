//! # Worker — Single-Source Test Pipeline
//!
//! Drives one bit source through the fixed test suite `[RCT, APT, SPRT,
//! ZMonobit?]`, reporting periodic statistics and anomalies to the
//! coordinator over a bounded channel. Honors bit/time limits and a
//! cooperative stop flag (the thread analog of the original's per-process
//! terminate).

use crate::online_tests::{Apt, OnlineTest, Rct, Sprt, ZMonobit};
use crate::sources::BitSource;
use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Per-worker configuration. Constructed once by the coordinator and shared
/// (by value, cheaply cloned) across all spawned workers.
#[derive(Clone)]
pub struct WorkerConfig {
    pub alpha: f64,
    pub beta: f64,
    pub delta: f64,
    pub apt_window: u64,
    pub max_bits: Option<u64>,
    pub max_seconds: Option<f64>,
    pub report_interval: f64,
    pub stop_on_anomaly: bool,
    pub per_iter: bool,
    pub iter_sample: u64,
    pub ztest_enabled: bool,
    pub z_alpha: Option<f64>,
    pub z_min_bits: u64,
}

/// Fully enriched anomaly record: the test-specific payload plus the
/// contextual snapshot injected by the worker at emission time.
#[derive(Clone, Debug, Serialize)]
pub struct AnomalyEvent {
    #[serde(flatten)]
    pub kind: crate::online_tests::AnomalyKind,
    pub proc_id: usize,
    pub bits_processed: u64,
    pub ones_total: u64,
    pub ones_pct: Option<f64>,
    pub apt_window: u64,
    pub apt_len: u64,
    pub apt_ones: u64,
    pub apt_pct: Option<f64>,
    pub rct_run_len: u64,
    pub sprt_up: f64,
    pub sprt_dn: f64,
    pub bps: f64,
}

/// The `Stats`/`Done` payload shape: a snapshot of per-process counters.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    pub proc_id: usize,
    pub bits_processed: u64,
    pub ones_total: u64,
    pub ones_pct: Option<f64>,
    pub apt_window: u64,
    pub apt_len: u64,
    pub apt_ones: u64,
    pub apt_pct: Option<f64>,
    pub rct_run_len: u64,
    pub sprt_up: f64,
    pub sprt_dn: f64,
    pub bps: f64,
}

/// An `Iter` payload: per-bit sampling, emitted only when `per_iter` is on.
#[derive(Clone, Debug, Serialize)]
pub struct IterSnapshot {
    pub proc_id: usize,
    pub bits_processed: u64,
    pub ones_total: u64,
    pub zeros_total: u64,
    pub ones_pct: f64,
    pub zeros_pct: f64,
}

/// Events a worker emits on its outbound channel.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event")]
pub enum WorkerEvent {
    #[serde(rename = "ANOMALY")]
    Anomaly(AnomalyEvent),
    #[serde(rename = "STATS")]
    Stats(StatsSnapshot),
    #[serde(rename = "ITER")]
    Iter(IterSnapshot),
    #[serde(rename = "DONE")]
    Done(StatsSnapshot),
    #[serde(rename = "ERROR")]
    Error { proc_id: usize, message: String },
}

struct TestSuite {
    rct: Rct,
    apt: Apt,
    sprt: Sprt,
    ztest: Option<ZMonobit>,
}

impl TestSuite {
    fn build(cfg: &WorkerConfig) -> Result<Self> {
        let rct = Rct::new(cfg.alpha)?;
        let apt = Apt::new(cfg.apt_window, cfg.alpha)?;
        let sprt = Sprt::new(cfg.delta, cfg.alpha, cfg.beta)?;
        let ztest = if cfg.ztest_enabled {
            let z_alpha = cfg.z_alpha.unwrap_or(cfg.alpha);
            Some(ZMonobit::new(z_alpha, cfg.z_min_bits)?)
        } else {
            None
        };
        Ok(TestSuite { rct, apt, sprt, ztest })
    }

}

/// Builds and sends the enriched `AnomalyEvent` for a single test firing,
/// using `suite`'s state as of right after that test's own `update` call —
/// tests later in the fixed order have not run yet for this bit. Returns
/// `false` if the channel is gone and the worker should stop immediately.
#[allow(clippy::too_many_arguments)]
fn send_anomaly(
    tx: &SyncSender<WorkerEvent>,
    proc_id: usize,
    kind: crate::online_tests::AnomalyKind,
    suite: &TestSuite,
    bits_seen: u64,
    ones_seen: u64,
    cfg: &WorkerConfig,
    t0: Instant,
) -> bool {
    let now = Instant::now();
    let elapsed = now.duration_since(t0).as_secs_f64();
    let bps = if elapsed > 0.0 {
        bits_seen as f64 / elapsed
    } else {
        f64::NAN
    };
    let apt_len = suite.apt.len() as u64;
    let event = AnomalyEvent {
        kind,
        proc_id,
        bits_processed: bits_seen,
        ones_total: ones_seen,
        ones_pct: Some(ones_seen as f64 / bits_seen as f64),
        apt_window: cfg.apt_window,
        apt_len,
        apt_ones: suite.apt.ones,
        apt_pct: if apt_len > 0 {
            Some(suite.apt.ones as f64 / apt_len as f64)
        } else {
            None
        },
        rct_run_len: suite.rct.run_len,
        sprt_up: suite.sprt.s_up,
        sprt_dn: suite.sprt.s_dn,
        bps,
    };
    tx.send(WorkerEvent::Anomaly(event)).is_ok()
}

/// Drives `source` through the test suite until a termination condition is
/// reached, sending events to `tx`. Returns `Ok(())` on a clean termination
/// (normal or `Error` event already sent); the only `Err` case is a channel
/// send failure, which means the coordinator is gone and the worker should
/// stop regardless.
pub fn run_worker(
    proc_id: usize,
    mut source: Box<dyn BitSource + Send>,
    cfg: WorkerConfig,
    tx: SyncSender<WorkerEvent>,
    stop_flag: Arc<AtomicBool>,
) {
    let mut suite = match TestSuite::build(&cfg) {
        Ok(s) => s,
        Err(e) => {
            let _ = tx.send(WorkerEvent::Error {
                proc_id,
                message: e.to_string(),
            });
            return;
        }
    };

    info!(proc_id, "worker starting");

    let mut bits_seen: u64 = 0;
    let mut ones_seen: u64 = 0;
    let t0 = Instant::now();
    let mut last_report = t0;

    loop {
        let bit = match source.next_bit() {
            Some(b) => b,
            None => break,
        };
        bits_seen += 1;
        ones_seen += bit as u64;

        if cfg.per_iter && bits_seen % cfg.iter_sample.max(1) == 0 {
            let zeros_seen = bits_seen - ones_seen;
            let snapshot = IterSnapshot {
                proc_id,
                bits_processed: bits_seen,
                ones_total: ones_seen,
                zeros_total: zeros_seen,
                ones_pct: ones_seen as f64 / bits_seen as f64,
                zeros_pct: zeros_seen as f64 / bits_seen as f64,
            };
            if tx.send(WorkerEvent::Iter(snapshot)).is_err() {
                return;
            }
        }

        // Each test runs and, on a hit, is enriched and emitted immediately
        // against the suite's state as of that point — not after the whole
        // battery has advanced. A later test in the order never influences
        // an earlier test's event.
        let mut stop_now = false;

        let rct_hit = suite.rct.update(bit);
        if let Some(kind) = rct_hit {
            if !send_anomaly(&tx, proc_id, kind, &suite, bits_seen, ones_seen, &cfg, t0) {
                return;
            }
            if cfg.stop_on_anomaly {
                stop_flag.store(true, Ordering::Relaxed);
                stop_now = true;
            }
        }

        if !stop_now {
            let apt_hit = suite.apt.update(bit);
            if let Some(kind) = apt_hit {
                if !send_anomaly(&tx, proc_id, kind, &suite, bits_seen, ones_seen, &cfg, t0) {
                    return;
                }
                if cfg.stop_on_anomaly {
                    stop_flag.store(true, Ordering::Relaxed);
                    stop_now = true;
                }
            }
        }

        if !stop_now {
            let sprt_hit = suite.sprt.update(bit);
            if let Some(kind) = sprt_hit {
                if !send_anomaly(&tx, proc_id, kind, &suite, bits_seen, ones_seen, &cfg, t0) {
                    return;
                }
                if cfg.stop_on_anomaly {
                    stop_flag.store(true, Ordering::Relaxed);
                    stop_now = true;
                }
            }
        }

        if !stop_now {
            let z_hit = suite.ztest.as_mut().and_then(|z| z.update(bit));
            if let Some(kind) = z_hit {
                if !send_anomaly(&tx, proc_id, kind, &suite, bits_seen, ones_seen, &cfg, t0) {
                    return;
                }
                if cfg.stop_on_anomaly {
                    stop_flag.store(true, Ordering::Relaxed);
                    stop_now = true;
                }
            }
        }

        if stop_now {
            return;
        }

        let now = Instant::now();
        if now.duration_since(last_report).as_secs_f64() >= cfg.report_interval {
            let snapshot = build_snapshot(proc_id, &suite, bits_seen, ones_seen, t0, now);
            if tx.send(WorkerEvent::Stats(snapshot)).is_err() {
                return;
            }
            last_report = now;
        }

        if stop_flag.load(Ordering::Relaxed) {
            debug!(proc_id, "worker observed stop flag");
            return;
        }
        if let Some(max_bits) = cfg.max_bits {
            if bits_seen >= max_bits {
                break;
            }
        }
        if let Some(max_seconds) = cfg.max_seconds {
            if t0.elapsed().as_secs_f64() >= max_seconds {
                break;
            }
        }
    }

    let now = Instant::now();
    let snapshot = build_snapshot(proc_id, &suite, bits_seen, ones_seen, t0, now);
    info!(proc_id, bits_seen, ones_seen, "worker done");
    let _ = tx.send(WorkerEvent::Done(snapshot));
}

fn build_snapshot(
    proc_id: usize,
    suite: &TestSuite,
    bits_seen: u64,
    ones_seen: u64,
    t0: Instant,
    now: Instant,
) -> StatsSnapshot {
    let elapsed = now.duration_since(t0).as_secs_f64();
    let bps = if elapsed > 0.0 {
        bits_seen as f64 / elapsed
    } else {
        f64::NAN
    };
    let apt_len = suite.apt.len() as u64;
    StatsSnapshot {
        proc_id,
        bits_processed: bits_seen,
        ones_total: ones_seen,
        ones_pct: if bits_seen > 0 {
            Some(ones_seen as f64 / bits_seen as f64)
        } else {
            None
        },
        apt_window: suite.apt.window(),
        apt_len,
        apt_ones: suite.apt.ones,
        apt_pct: if apt_len > 0 {
            Some(suite.apt.ones as f64 / apt_len as f64)
        } else {
            None
        },
        rct_run_len: suite.rct.run_len,
        sprt_up: suite.sprt.s_up,
        sprt_dn: suite.sprt.s_dn,
        bps,
    }
}
