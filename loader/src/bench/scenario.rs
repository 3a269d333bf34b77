//! Benchmark scenario definitions
//!
//! Durations are written in milliseconds on the wire:
//!
//! ```json
//! {
//!   "name": "C03__clients_4",
//!   "concurrency": 4,
//!   "queryMix": [{"query": "01_match_text.json", "weight": 3}, {"query": "02_aggs.json", "weight": 1}],
//!   "stop": {"durationMs": 10000},
//!   "rampUpMs": 2000
//! }
//! ```

use crate::error::{LoaderError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client counts swept by the default plan
pub const DEFAULT_CLIENT_SWEEP: [usize; 10] = [1, 2, 4, 6, 8, 10, 12, 16, 20, 24];

fn default_request_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_warmup_requests() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// A query template reference and its relative weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedQuery {
    /// Template id (file name in the query directory)
    pub query: String,
    pub weight: f64,
}

/// When a scenario's workers stop issuing queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopCondition {
    /// Wall-clock length of the measured phase
    #[serde(rename = "durationMs", with = "millis")]
    Duration(Duration),
    /// Queries issued by each worker
    Iterations(u64),
}

/// One concurrent load-test scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    pub name: String,
    /// Number of concurrent workers
    pub concurrency: usize,
    /// Ordered template weights; empty means every template, equally weighted
    #[serde(default)]
    pub query_mix: Vec<WeightedQuery>,
    pub stop: StopCondition,
    /// Window over which worker start times are spread
    #[serde(default, rename = "rampUpMs", with = "millis::option")]
    pub ramp_up: Option<Duration>,
    #[serde(
        default = "default_request_timeout",
        rename = "requestTimeoutMs",
        with = "millis"
    )]
    pub request_timeout: Duration,
    /// Unmeasured queries issued before the measured phase
    #[serde(default = "default_warmup_requests")]
    pub warmup_requests: usize,
    /// Clear the index's query caches before warm-up
    #[serde(default = "default_true")]
    pub clear_cache: bool,
    /// Seed for query selection; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ScenarioConfig {
    /// Scenario with default timeout, warm-up and cache settings
    pub fn new(name: impl Into<String>, concurrency: usize, stop: StopCondition) -> Self {
        Self {
            name: name.into(),
            concurrency,
            query_mix: Vec::new(),
            stop,
            ramp_up: None,
            request_timeout: default_request_timeout(),
            warmup_requests: default_warmup_requests(),
            clear_cache: true,
            seed: None,
        }
    }

    pub fn with_mix(mut self, mix: Vec<WeightedQuery>) -> Self {
        self.query_mix = mix;
        self
    }

    pub fn with_ramp_up(mut self, ramp_up: Duration) -> Self {
        self.ramp_up = Some(ramp_up);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(LoaderError::Config(format!("scenario '{}': {msg}", self.name)));

        if self.name.trim().is_empty() {
            return Err(LoaderError::Config("scenario name is empty".into()));
        }
        if self.concurrency == 0 {
            return fail("concurrency must be at least 1".into());
        }
        match self.stop {
            StopCondition::Duration(d) if d.is_zero() => return fail("duration must be positive".into()),
            StopCondition::Iterations(0) => return fail("iteration count must be positive".into()),
            _ => {}
        }
        if self.request_timeout.is_zero() {
            return fail("request timeout must be positive".into());
        }
        if let Some(bad) = self
            .query_mix
            .iter()
            .find(|q| !q.weight.is_finite() || q.weight < 0.0)
        {
            return fail(format!("invalid weight {} for '{}'", bad.weight, bad.query));
        }
        if !self.query_mix.is_empty() && self.query_mix.iter().all(|q| q.weight == 0.0) {
            return fail("query mix has no positive weight".into());
        }
        Ok(())
    }

    /// Deadline offset of the measured phase, if time-bounded
    pub fn duration(&self) -> Option<Duration> {
        match self.stop {
            StopCondition::Duration(d) => Some(d),
            StopCondition::Iterations(_) => None,
        }
    }
}

/// Scenarios run back to back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkPlan {
    pub scenarios: Vec<ScenarioConfig>,
}

impl BenchmarkPlan {
    /// One scenario per client count, named `C01__clients_1`, `C02__clients_2`, ...
    ///
    /// Every scenario copies `template` apart from name and concurrency.
    pub fn client_sweep(clients: &[usize], template: &ScenarioConfig) -> Self {
        let scenarios = clients
            .iter()
            .enumerate()
            .map(|(i, &n)| ScenarioConfig {
                name: format!("C{:02}__clients_{n}", i + 1),
                concurrency: n,
                ..template.clone()
            })
            .collect();
        Self { scenarios }
    }

    /// The standard 1..24 client sweep
    pub fn default_sweep(template: &ScenarioConfig) -> Self {
        Self::client_sweep(&DEFAULT_CLIENT_SWEEP, template)
    }

    /// Parse a plan from JSON and validate every scenario
    pub fn from_json(json: &str) -> Result<Self> {
        let plan: BenchmarkPlan = serde_json::from_str(json)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::Config(format!("cannot read scenario file {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scenarios.is_empty() {
            return Err(LoaderError::Config("benchmark plan has no scenarios".into()));
        }
        self.scenarios.iter().try_for_each(ScenarioConfig::validate)
    }
}

/// `Duration` as integer milliseconds
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    /// `Option<Duration>` as optional integer milliseconds
    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario_with_defaults() {
        let json = r#"{
            "name": "smoke",
            "concurrency": 3,
            "queryMix": [{"query": "a.json", "weight": 2.0}, {"query": "b.json", "weight": 1}],
            "stop": {"durationMs": 1500},
            "rampUpMs": 300
        }"#;
        let config: ScenarioConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.stop, StopCondition::Duration(Duration::from_millis(1500)));
        assert_eq!(config.ramp_up, Some(Duration::from_millis(300)));
        assert_eq!(config.request_timeout, Duration::from_secs(180));
        assert_eq!(config.warmup_requests, 5);
        assert!(config.clear_cache);
        assert_eq!(config.seed, None);
        assert_eq!(config.query_mix[1].weight, 1.0);
        config.validate().unwrap();
    }

    #[test]
    fn test_iteration_stop_condition() {
        let json = r#"{"name": "n", "concurrency": 1, "stop": {"iterations": 50}, "seed": 7}"#;
        let config: ScenarioConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stop, StopCondition::Iterations(50));
        assert_eq!(config.duration(), None);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_serialize_round_trips_millis() {
        let config = ScenarioConfig::new("x", 2, StopCondition::Duration(Duration::from_secs(2)))
            .with_ramp_up(Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["stop"]["durationMs"], 2000);
        assert_eq!(json["rampUpMs"], 250);
        assert_eq!(json["requestTimeoutMs"], 180_000);
        let back: ScenarioConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let ok = ScenarioConfig::new("ok", 1, StopCondition::Iterations(1));
        ok.validate().unwrap();

        let mut zero_clients = ok.clone();
        zero_clients.concurrency = 0;
        assert!(zero_clients.validate().is_err());

        let zero_duration = ScenarioConfig::new("d", 1, StopCondition::Duration(Duration::ZERO));
        assert!(zero_duration.validate().is_err());

        assert!(ScenarioConfig::new("i", 1, StopCondition::Iterations(0)).validate().is_err());

        let negative = ok.clone().with_mix(vec![WeightedQuery {
            query: "a".into(),
            weight: -1.0,
        }]);
        assert!(negative.validate().is_err());

        let all_zero = ok.with_mix(vec![WeightedQuery {
            query: "a".into(),
            weight: 0.0,
        }]);
        assert!(matches!(all_zero.validate(), Err(LoaderError::Config(_))));
    }

    #[test]
    fn test_default_sweep_names() {
        let template = ScenarioConfig::new("t", 1, StopCondition::Duration(Duration::from_secs(10)));
        let plan = BenchmarkPlan::default_sweep(&template);
        assert_eq!(plan.scenarios.len(), 10);
        assert_eq!(plan.scenarios[0].name, "C01__clients_1");
        assert_eq!(plan.scenarios[2].name, "C03__clients_4");
        assert_eq!(plan.scenarios[9].name, "C10__clients_24");
        assert_eq!(plan.scenarios[9].concurrency, 24);
        assert!(plan.scenarios.iter().all(|s| s.stop == template.stop));
        plan.validate().unwrap();
    }

    #[test]
    fn test_plan_from_json() {
        let plan = BenchmarkPlan::from_json(
            r#"{"scenarios": [{"name": "a", "concurrency": 2, "stop": {"iterations": 10}}]}"#,
        )
        .unwrap();
        assert_eq!(plan.scenarios.len(), 1);

        assert!(BenchmarkPlan::from_json(r#"{"scenarios": []}"#).is_err());
        assert!(BenchmarkPlan::from_json("not json").is_err());
    }
}
