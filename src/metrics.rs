//! # Metrics — Prometheus Exposition for the Detector
//!
//! A small `prometheus-client` registry mirroring the host crate's
//! `prom_metrics.rs` shape: a `Family<Label, Counter>` for per-test anomaly
//! counts and a `Gauge` for aggregate throughput. Purely additive
//! instrumentation — nothing in the detection pipeline depends on it, and a
//! failure to scrape never affects a run.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

/// Label set for per-test anomaly counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TestLabel {
    pub test: String,
}

/// Thread-safe metrics registry for the coordinator. All fields use atomic
/// types and are safe to update from any thread.
pub struct Metrics {
    registry: Mutex<Registry>,
    anomalies_total: Family<TestLabel, Counter>,
    aggregate_bps: Gauge<f64, AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let anomalies_total = Family::<TestLabel, Counter>::default();
        registry.register(
            "biasguard_anomalies",
            "Total anomalies raised, by test",
            anomalies_total.clone(),
        );

        let aggregate_bps = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "biasguard_aggregate_bps",
            "Aggregate throughput across all workers",
            aggregate_bps.clone(),
        );

        Metrics {
            registry: Mutex::new(registry),
            anomalies_total,
            aggregate_bps,
        }
    }

    pub fn record_anomaly(&self, test: &str) {
        self.anomalies_total
            .get_or_create(&TestLabel { test: test.to_string() })
            .inc();
    }

    pub fn set_aggregate_bps(&self, bps: f64) {
        if bps.is_finite() {
            self.aggregate_bps.set(bps);
        }
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Ok(registry) = self.registry.lock() {
            let _ = encode(&mut buf, &registry);
        }
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_anomalies_by_label() {
        let m = Metrics::new();
        m.record_anomaly("RCT");
        m.record_anomaly("RCT");
        m.record_anomaly("APT");
        let text = m.encode();
        assert!(text.contains("biasguard_anomalies"));
    }

    #[test]
    fn ignores_non_finite_bps() {
        let m = Metrics::new();
        m.set_aggregate_bps(f64::NAN);
        m.set_aggregate_bps(1234.5);
        let text = m.encode();
        assert!(text.contains("biasguard_aggregate_bps"));
    }
}
