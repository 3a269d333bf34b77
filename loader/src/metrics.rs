//! Prometheus metrics for the review loader

use crate::error::{LoaderError, Result};
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder, register_counter_vec, register_gauge,
    register_histogram_vec,
};
use std::sync::OnceLock;

/// Global metrics instance
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// All loader metrics
pub struct Metrics {
    /// Documents by outcome (submitted, succeeded, failed, rejected, retried)
    pub documents: CounterVec,

    /// Bulk requests by result (ok, partial, error)
    pub bulk_requests: CounterVec,

    /// Bulk request latency (by result)
    pub bulk_latency: HistogramVec,

    /// Bulk requests currently in flight
    pub bulk_in_flight: Gauge,

    /// Benchmark requests (by scenario, outcome)
    pub bench_requests: CounterVec,

    /// Benchmark request latency (by scenario)
    pub bench_latency: HistogramVec,
}

impl Metrics {
    /// Initialize metrics (call once at startup)
    ///
    /// Returns error if metric registration fails.
    pub fn init() -> Result<&'static Metrics> {
        if let Some(metrics) = METRICS.get() {
            return Ok(metrics);
        }

        let metrics = Metrics {
            documents: register_counter_vec!(
                "loader_documents_total",
                "Documents processed by outcome",
                &["outcome"]
            )
            .map_err(|e| LoaderError::Metrics(format!("documents: {e}")))?,

            bulk_requests: register_counter_vec!(
                "loader_bulk_requests_total",
                "Bulk requests issued by result",
                &["result"]
            )
            .map_err(|e| LoaderError::Metrics(format!("bulk_requests: {e}")))?,

            bulk_latency: register_histogram_vec!(
                "loader_bulk_latency_seconds",
                "Bulk request latency",
                &["result"],
                vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            )
            .map_err(|e| LoaderError::Metrics(format!("bulk_latency: {e}")))?,

            bulk_in_flight: register_gauge!(
                "loader_bulk_in_flight",
                "Bulk requests currently in flight"
            )
            .map_err(|e| LoaderError::Metrics(format!("bulk_in_flight: {e}")))?,

            bench_requests: register_counter_vec!(
                "loader_bench_requests_total",
                "Benchmark queries issued",
                &["scenario", "outcome"]
            )
            .map_err(|e| LoaderError::Metrics(format!("bench_requests: {e}")))?,

            bench_latency: register_histogram_vec!(
                "loader_bench_latency_seconds",
                "Benchmark query latency",
                &["scenario"],
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
            )
            .map_err(|e| LoaderError::Metrics(format!("bench_latency: {e}")))?,
        };

        // Only the first set wins
        let _ = METRICS.set(metrics);

        METRICS
            .get()
            .ok_or_else(|| LoaderError::Metrics("Failed to initialize metrics".to_string()))
    }

    /// Get the global metrics instance
    ///
    /// Returns None if metrics haven't been initialized yet.
    pub fn get() -> Option<&'static Metrics> {
        METRICS.get()
    }

    pub fn record_documents(&self, outcome: &str, count: u64) {
        self.documents
            .with_label_values(&[outcome])
            .inc_by(count as f64);
    }

    pub fn record_bulk(&self, result: &str, seconds: f64) {
        self.bulk_requests.with_label_values(&[result]).inc();
        self.bulk_latency
            .with_label_values(&[result])
            .observe(seconds);
    }

    pub fn set_in_flight(&self, in_flight: u64) {
        self.bulk_in_flight.set(in_flight as f64);
    }

    pub fn record_bench(&self, scenario: &str, outcome: &str, seconds: f64) {
        self.bench_requests
            .with_label_values(&[scenario, outcome])
            .inc();
        self.bench_latency
            .with_label_values(&[scenario])
            .observe(seconds);
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}

/// Record document outcomes if metrics are initialized
pub fn try_record_documents(outcome: &str, count: u64) {
    if count == 0 {
        return;
    }
    if let Some(m) = Metrics::get() {
        m.record_documents(outcome, count);
    }
}

/// Record a completed bulk request if metrics are initialized
pub fn try_record_bulk(result: &str, seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.record_bulk(result, seconds);
    }
}

pub fn try_set_in_flight(in_flight: u64) {
    if let Some(m) = Metrics::get() {
        m.set_in_flight(in_flight);
    }
}

/// Record a benchmark query if metrics are initialized
pub fn try_record_bench(scenario: &str, outcome: &str, seconds: f64) {
    if let Some(m) = Metrics::get() {
        m.record_bench(scenario, outcome, seconds);
    }
}
