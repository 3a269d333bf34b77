//! Configuration for review-loader
//!
//! Every setting comes from an environment variable and has a default.

use crate::backoff::BackoffConfig;
use crate::bench::{BenchmarkPlan, ScenarioConfig, StopCondition};
use crate::error::{LoaderError, Result};
use crate::ingest::{BatchLimits, FailurePolicy, PipelineConfig};
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration for review-loader
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the search engine
    pub elastic_url: String,

    /// Target index
    pub index: String,

    /// Review dump to ingest (plain or .gz)
    pub dataset_path: Option<PathBuf>,

    /// Documents per bulk request
    pub batch_size: usize,

    /// Estimated bytes per bulk request
    pub batch_max_bytes: usize,

    /// Concurrent bulk requests
    pub admission_window: usize,

    /// Batches buffered ahead of the indexer
    pub queue_capacity: usize,

    /// Retries per document after the first submission
    pub max_retries: u32,

    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// Abort threshold on terminal failures
    pub max_failure_rate: f64,

    /// Resolved documents before the threshold applies
    pub min_docs_for_failure_rate: u64,

    /// Per-request timeout for bulk writes and queries
    pub request_timeout: Duration,

    /// Directory of `*.json` query templates
    pub query_dir: PathBuf,

    /// Benchmark plan; the default client sweep when unset
    pub scenario_file: Option<PathBuf>,

    /// Measured duration of each sweep scenario
    pub duration_per_client: Duration,

    pub warmup_requests: usize,
    pub seed: u64,

    /// Directory for per-request benchmark logs; not written when unset
    pub out_dir: Option<PathBuf>,

    /// Prometheus endpoint port; disabled when unset
    pub metrics_port: Option<u16>,

    /// Log level
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("{other} (expected 'json' or 'pretty')")),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elastic_url: "http://localhost:9200".to_string(),
            index: "amazon-music-reviews".to_string(),
            dataset_path: None,
            batch_size: 1000,
            batch_max_bytes: 5 * 1024 * 1024,
            admission_window: 4,
            queue_capacity: 8,
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(10_000),
            max_failure_rate: 0.05,
            min_docs_for_failure_rate: 1000,
            request_timeout: Duration::from_secs(180),
            query_dir: PathBuf::from("queries"),
            scenario_file: None,
            duration_per_client: Duration::from_secs(10),
            warmup_requests: 5,
            seed: 42,
            out_dir: None,
            metrics_port: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Parse `key` if set. Empty values count as unset.
fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| LoaderError::Config(format!("invalid {key}: {e}"))),
        None => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(url) = parse::<String, _>(&lookup, "ELASTIC_URL")? {
            config.elastic_url = url;
        }
        if let Some(index) = parse::<String, _>(&lookup, "INDEX_NAME")? {
            config.index = index;
        }
        config.dataset_path = parse(&lookup, "DATASET_PATH")?;
        if let Some(v) = parse(&lookup, "BULK_BATCH_SIZE")? {
            config.batch_size = v;
        }
        if let Some(v) = parse(&lookup, "BULK_MAX_BYTES")? {
            config.batch_max_bytes = v;
        }
        if let Some(v) = parse(&lookup, "BULK_ADMISSION_WINDOW")? {
            config.admission_window = v;
        }
        if let Some(v) = parse(&lookup, "BULK_QUEUE_CAPACITY")? {
            config.queue_capacity = v;
        }
        if let Some(v) = parse(&lookup, "BULK_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(ms) = parse(&lookup, "BULK_INITIAL_BACKOFF_MS")? {
            config.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(&lookup, "BULK_MAX_BACKOFF_MS")? {
            config.max_backoff = Duration::from_millis(ms);
        }
        if let Some(v) = parse(&lookup, "MAX_FAILURE_RATE")? {
            config.max_failure_rate = v;
        }
        if let Some(v) = parse(&lookup, "MIN_DOCS_FOR_FAILURE_RATE")? {
            config.min_docs_for_failure_rate = v;
        }
        if let Some(secs) = parse::<f64, _>(&lookup, "REQUEST_TIMEOUT")? {
            config.request_timeout = seconds("REQUEST_TIMEOUT", secs)?;
        }
        if let Some(dir) = parse(&lookup, "QUERY_DIR")? {
            config.query_dir = dir;
        }
        config.scenario_file = parse(&lookup, "SCENARIO_FILE")?;
        if let Some(secs) = parse::<f64, _>(&lookup, "DURATION_PER_CLIENT")? {
            config.duration_per_client = seconds("DURATION_PER_CLIENT", secs)?;
        }
        if let Some(v) = parse(&lookup, "WARMUP_REQUESTS")? {
            config.warmup_requests = v;
        }
        if let Some(v) = parse(&lookup, "SEED")? {
            config.seed = v;
        }
        config.out_dir = parse(&lookup, "OUT_DIR")?;
        config.metrics_port = parse(&lookup, "LOADER_METRICS_PORT")?;
        if let Some(level) = parse::<String, _>(&lookup, "LOADER_LOG_LEVEL")? {
            config.log_level = level;
        }
        if let Some(format) = parse(&lookup, "LOADER_LOG_FORMAT")? {
            config.log_format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot produce a working run
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(LoaderError::Config("BULK_BATCH_SIZE must be at least 1".into()));
        }
        if self.batch_max_bytes == 0 {
            return Err(LoaderError::Config("BULK_MAX_BYTES must be at least 1".into()));
        }
        if self.admission_window == 0 {
            return Err(LoaderError::Config(
                "BULK_ADMISSION_WINDOW must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(LoaderError::Config("BULK_QUEUE_CAPACITY must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) {
            return Err(LoaderError::Config(format!(
                "MAX_FAILURE_RATE must be within [0, 1], got {}",
                self.max_failure_rate
            )));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(LoaderError::Config(
                "BULK_MAX_BACKOFF_MS is below BULK_INITIAL_BACKOFF_MS".into(),
            ));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max_attempts: self.max_retries,
            initial_delay: self.initial_backoff,
            max_delay: self.max_backoff,
            ..BackoffConfig::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            index: self.index.clone(),
            limits: BatchLimits {
                max_docs: self.batch_size,
                max_bytes: self.batch_max_bytes,
            },
            queue_capacity: self.queue_capacity,
            admission_window: self.admission_window,
            backoff: self.backoff(),
            failure_policy: FailurePolicy {
                max_failure_rate: self.max_failure_rate,
                min_resolved: self.min_docs_for_failure_rate,
            },
            ..PipelineConfig::default()
        }
    }

    /// Scenario settings shared by every step of the default sweep
    pub fn sweep_template(&self) -> ScenarioConfig {
        ScenarioConfig {
            request_timeout: self.request_timeout,
            warmup_requests: self.warmup_requests,
            ..ScenarioConfig::new("sweep", 1, StopCondition::Duration(self.duration_per_client))
                .with_seed(self.seed)
        }
    }

    /// The plan from `SCENARIO_FILE`, or the default client sweep
    pub fn benchmark_plan(&self) -> Result<BenchmarkPlan> {
        match &self.scenario_file {
            Some(path) => BenchmarkPlan::from_file(path),
            None => Ok(BenchmarkPlan::default_sweep(&self.sweep_template())),
        }
    }
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(LoaderError::Config(format!("{key} must be a positive number of seconds")));
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.elastic_url, "http://localhost:9200");
        assert_eq!(config.index, "amazon-music-reviews");
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.admission_window, 4);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(180));
        assert_eq!(config.duration_per_client, Duration::from_secs(10));
        assert_eq!(config.seed, 42);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.out_dir, None);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("ELASTIC_URL", "http://es:9200"),
            ("BULK_BATCH_SIZE", "500"),
            ("BULK_ADMISSION_WINDOW", "8"),
            ("REQUEST_TIMEOUT", "2.5"),
            ("DATASET_PATH", "/data/Music.txt.gz"),
            ("LOADER_METRICS_PORT", "9464"),
            ("LOADER_LOG_FORMAT", "JSON"),
            ("OUT_DIR", "results"),
            ("SEED", ""),
        ])
        .unwrap();
        assert_eq!(config.elastic_url, "http://es:9200");
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.admission_window, 8);
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.dataset_path, Some(PathBuf::from("/data/Music.txt.gz")));
        assert_eq!(config.metrics_port, Some(9464));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.out_dir, Some(PathBuf::from("results")));
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for (key, value) in [
            ("BULK_BATCH_SIZE", "many"),
            ("BULK_BATCH_SIZE", "0"),
            ("MAX_FAILURE_RATE", "1.5"),
            ("REQUEST_TIMEOUT", "-1"),
            ("LOADER_LOG_FORMAT", "xml"),
            ("LOADER_METRICS_PORT", "70000"),
        ] {
            let err = from_pairs(&[(key, value)]).unwrap_err();
            assert!(matches!(err, LoaderError::Config(_)), "{key}={value}");
        }
    }

    #[test]
    fn test_derived_settings() {
        let config = from_pairs(&[
            ("BULK_MAX_RETRIES", "5"),
            ("MIN_DOCS_FOR_FAILURE_RATE", "10"),
            ("DURATION_PER_CLIENT", "3"),
            ("WARMUP_REQUESTS", "0"),
        ])
        .unwrap();

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.backoff.max_attempts, 5);
        assert_eq!(pipeline.failure_policy.min_resolved, 10);
        assert_eq!(pipeline.limits.max_docs, 1000);

        let plan = config.benchmark_plan().unwrap();
        assert_eq!(plan.scenarios.len(), 10);
        let first = &plan.scenarios[0];
        assert_eq!(first.stop, StopCondition::Duration(Duration::from_secs(3)));
        assert_eq!(first.warmup_requests, 0);
        assert_eq!(first.seed, Some(42));
    }
}
