//! Latency samples and scenario summaries
//!
//! Percentiles use the nearest-rank method over the fully sorted sample
//! set: the p-th percentile of n values is the value at rank ⌈p·n/100⌉.

use crate::error::StoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// How a benchmark request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    Success,
    ClientError,
    ServerError,
    Timeout,
}

impl SampleOutcome {
    /// Classify a failed request
    pub fn from_error(err: &StoreError) -> Self {
        match err {
            StoreError::Timeout(_) => SampleOutcome::Timeout,
            StoreError::Http { status, .. } if (400..500).contains(status) => {
                SampleOutcome::ClientError
            }
            StoreError::Init(_) | StoreError::Encode(_) => SampleOutcome::ClientError,
            StoreError::Http { .. } | StoreError::Connection(_) | StoreError::Decode(_) => {
                SampleOutcome::ServerError
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleOutcome::Success => "success",
            SampleOutcome::ClientError => "client_error",
            SampleOutcome::ServerError => "server_error",
            SampleOutcome::Timeout => "timeout",
        }
    }
}

/// One measured request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySample {
    pub query_id: String,
    pub worker: usize,
    /// Wall-clock start, microseconds since the Unix epoch
    pub started_at_micros: i64,
    pub duration_micros: u64,
    pub outcome: SampleOutcome,
    /// Server-side `took`, when the response carried it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub took_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_hits: Option<u64>,
}

/// Latency figures over successful requests, in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

/// Server-side `took` figures over successful requests
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TookStats {
    pub mean_ms: Option<f64>,
    pub p95_ms: Option<u64>,
}

/// Failed requests by outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorBreakdown {
    pub client_error: u64,
    pub server_error: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryBreakdown {
    pub requests: u64,
    pub successes: u64,
    pub mean_ms: Option<f64>,
}

/// Result of one scenario run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioSummary {
    pub scenario: String,
    pub concurrency: usize,
    pub elapsed_secs: f64,
    pub total_requests: u64,
    pub success_count: u64,
    /// Successes over total requests, 0 when nothing ran
    pub success_rate: f64,
    pub errors: ErrorBreakdown,
    pub throughput_rps: f64,
    pub latency: LatencyStats,
    pub took: TookStats,
    pub per_query: BTreeMap<String, QueryBreakdown>,
}

/// Nearest-rank percentile of an ascending slice
pub fn nearest_rank(sorted: &[u64], p: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = (p * n as f64 / 100.0).ceil() as usize;
    Some(sorted[rank.clamp(1, n) - 1])
}

fn mean(values: &[u64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64)
}

fn micros_to_ms(micros: u64) -> f64 {
    micros as f64 / 1000.0
}

/// Accumulates the samples of one scenario run
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    samples: Vec<LatencySample>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: LatencySample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[LatencySample] {
        &self.samples
    }

    /// Give up the recorded samples, in arrival order
    pub fn into_samples(self) -> Vec<LatencySample> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Compute the summary over everything recorded so far.
    ///
    /// `elapsed` is the measured wall-clock used for throughput.
    pub fn summarize(&self, scenario: &str, concurrency: usize, elapsed: Duration) -> ScenarioSummary {
        let total = self.samples.len() as u64;
        let mut errors = ErrorBreakdown::default();
        let mut latencies = Vec::with_capacity(self.samples.len());
        let mut tooks = Vec::new();
        let mut per_query: BTreeMap<String, (QueryBreakdown, u64)> = BTreeMap::new();

        for sample in &self.samples {
            let (entry, latency_sum) = per_query.entry(sample.query_id.clone()).or_default();
            entry.requests += 1;
            match sample.outcome {
                SampleOutcome::Success => {
                    entry.successes += 1;
                    *latency_sum += sample.duration_micros;
                    latencies.push(sample.duration_micros);
                    tooks.extend(sample.took_ms);
                }
                SampleOutcome::ClientError => errors.client_error += 1,
                SampleOutcome::ServerError => errors.server_error += 1,
                SampleOutcome::Timeout => errors.timeout += 1,
            }
        }

        latencies.sort_unstable();
        tooks.sort_unstable();

        let success = latencies.len() as u64;
        let secs = elapsed.as_secs_f64();
        let percentile = |p: f64| nearest_rank(&latencies, p).map(micros_to_ms);

        ScenarioSummary {
            scenario: scenario.to_string(),
            concurrency,
            elapsed_secs: secs,
            total_requests: total,
            success_count: success,
            success_rate: if total == 0 {
                0.0
            } else {
                success as f64 / total as f64
            },
            errors,
            throughput_rps: if secs > 0.0 { total as f64 / secs } else { 0.0 },
            latency: LatencyStats {
                mean_ms: mean(&latencies).map(|m| m / 1000.0),
                p50_ms: percentile(50.0),
                p90_ms: percentile(90.0),
                p95_ms: percentile(95.0),
                p99_ms: percentile(99.0),
            },
            took: TookStats {
                mean_ms: mean(&tooks),
                p95_ms: nearest_rank(&tooks, 95.0),
            },
            per_query: per_query
                .into_iter()
                .map(|(id, (mut breakdown, latency_sum))| {
                    if breakdown.successes > 0 {
                        breakdown.mean_ms =
                            Some(latency_sum as f64 / breakdown.successes as f64 / 1000.0);
                    }
                    (id, breakdown)
                })
                .collect(),
        }
    }
}
