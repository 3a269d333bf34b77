//! Integration tests for the benchmark runner
//!
//! A stub store stands in for the search engine so that latency, outcome
//! classification and stop conditions can be checked deterministically.

use async_trait::async_trait;
use parking_lot::Mutex;
use review_loader::bench::{
    BenchmarkPlan, QueryCatalog, QueryTemplate, ScenarioConfig, ScenarioRunner, StopCondition,
    WeightedQuery,
};
use review_loader::{DocumentStore, ItemOutcome, NormalizedDocument, SearchResponse, StoreError};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Store
// ============================================================================

/// Answers searches after a fixed delay; the template's `tag` picks the reply
struct SearchStub {
    delay: Duration,
    searches: AtomicU64,
    cache_clears: AtomicU64,
    calls: Mutex<Vec<Instant>>,
    per_tag: Mutex<HashMap<String, u64>>,
}

impl SearchStub {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            searches: AtomicU64::new(0),
            cache_clears: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            per_tag: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl DocumentStore for SearchStub {
    fn name(&self) -> &'static str {
        "search_stub"
    }

    async fn bulk_index(
        &self,
        _: &str,
        docs: &[&NormalizedDocument],
    ) -> Result<Vec<ItemOutcome>, StoreError> {
        Ok(vec![ItemOutcome::Success; docs.len()])
    }

    async fn search(&self, _index: &str, query: &Value) -> Result<SearchResponse, StoreError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(Instant::now());
        let tag = query["tag"].as_str().unwrap_or_default().to_string();
        *self.per_tag.lock().entry(tag.clone()).or_insert(0) += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match tag.as_str() {
            "bad" => Err(StoreError::Http {
                status: 400,
                body: "parsing_exception".into(),
            }),
            "boom" => Err(StoreError::Http {
                status: 503,
                body: "search_phase_execution_exception".into(),
            }),
            _ => Ok(SearchResponse {
                took_ms: Some(7),
                total_hits: Some(42),
            }),
        }
    }

    async fn clear_cache(&self, _index: &str) -> Result<(), StoreError> {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> bool {
        true
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn catalog(tags: &[&str]) -> QueryCatalog {
    QueryCatalog::new(
        tags.iter()
            .map(|tag| QueryTemplate::new(format!("{tag}.json"), json!({ "tag": tag, "size": 10 })))
            .collect(),
    )
}

fn scenario(concurrency: usize, stop: StopCondition) -> ScenarioConfig {
    let mut config = ScenarioConfig::new("test", concurrency, stop).with_seed(7);
    config.warmup_requests = 0;
    config.clear_cache = false;
    config
}

// ============================================================================
// Stop conditions
// ============================================================================

#[tokio::test]
async fn test_duration_bounded_throughput() {
    let store = Arc::new(SearchStub::new(Duration::from_millis(10)));
    let runner = ScenarioRunner::new(store.clone(), "reviews");
    let config = scenario(5, StopCondition::Duration(Duration::from_secs(2)));

    let summary = runner.run(&config, &catalog(&["match"])).await.unwrap().summary;

    assert_eq!(summary.concurrency, 5);
    assert!(
        (700..=1010).contains(&summary.success_count),
        "unexpected success count {}",
        summary.success_count
    );
    // At most one request per worker is cut off by the deadline
    assert!(summary.errors.timeout <= 5);
    assert_eq!(summary.errors.client_error, 0);
    assert_eq!(summary.errors.server_error, 0);
    assert_eq!(
        summary.total_requests,
        summary.success_count + summary.errors.timeout
    );
    assert!(summary.elapsed_secs >= 2.0);
    assert!(summary.elapsed_secs < 3.0);
    assert!(summary.throughput_rps > 0.0);
    assert!(summary.latency.p50_ms.unwrap() >= 10.0);
}

#[tokio::test]
async fn test_iteration_bounded_request_count() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let runner = ScenarioRunner::new(store.clone(), "reviews");
    let config = scenario(4, StopCondition::Iterations(25));

    let summary = runner.run(&config, &catalog(&["match", "range"])).await.unwrap().summary;

    assert_eq!(summary.total_requests, 100);
    assert_eq!(summary.success_count, 100);
    assert_eq!(summary.success_rate, 1.0);
    assert_eq!(store.searches.load(Ordering::SeqCst), 100);
    assert_eq!(summary.took.mean_ms, Some(7.0));
    assert_eq!(summary.took.p95_ms, Some(7));
}

#[tokio::test]
async fn test_request_timeout_recorded_as_timeout() {
    let store = Arc::new(SearchStub::new(Duration::from_millis(300)));
    let runner = ScenarioRunner::new(store, "reviews");
    let mut config = scenario(2, StopCondition::Iterations(2));
    config.request_timeout = Duration::from_millis(50);

    let summary = runner.run(&config, &catalog(&["match"])).await.unwrap().summary;

    assert_eq!(summary.total_requests, 4);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.errors.timeout, 4);
    assert_eq!(summary.latency.p95_ms, None);
}

#[tokio::test]
async fn test_requests_in_flight_at_deadline_are_timeouts() {
    let store = Arc::new(SearchStub::new(Duration::from_secs(5)));
    let runner = ScenarioRunner::new(store.clone(), "reviews");
    let config = scenario(3, StopCondition::Duration(Duration::from_millis(200)));

    let summary = runner.run(&config, &catalog(&["match"])).await.unwrap().summary;

    assert_eq!(store.searches.load(Ordering::SeqCst), 3);
    assert_eq!(summary.total_requests, 3);
    assert_eq!(summary.errors.timeout, 3);
    assert_eq!(summary.success_count, 0);
    assert!(summary.elapsed_secs >= 0.2);
    assert!(summary.elapsed_secs < 1.0, "elapsed {}", summary.elapsed_secs);
}

#[tokio::test]
async fn test_cancel_mid_request_records_timeouts() {
    let store = Arc::new(SearchStub::new(Duration::from_secs(5)));
    let cancel = CancellationToken::new();
    let runner = ScenarioRunner::new(store.clone(), "reviews").with_cancellation(cancel.clone());
    let config = scenario(3, StopCondition::Duration(Duration::from_secs(30)));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let summary = runner.run(&config, &catalog(&["match"])).await.unwrap().summary;

    assert_eq!(summary.total_requests, 3);
    assert_eq!(summary.errors.timeout, 3);
    assert!(summary.elapsed_secs < 1.0, "elapsed {}", summary.elapsed_secs);
}

#[tokio::test]
async fn test_run_returns_every_sample() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let runner = ScenarioRunner::new(store, "reviews");
    let config = scenario(3, StopCondition::Iterations(7));

    let run = runner.run(&config, &catalog(&["match", "range"])).await.unwrap();

    assert_eq!(run.samples.len() as u64, run.summary.total_requests);
    assert_eq!(run.samples.len(), 21);
    for worker in 0..3 {
        assert_eq!(run.samples.iter().filter(|s| s.worker == worker).count(), 7);
    }
    assert!(run.samples.iter().all(|s| s.took_ms == Some(7) && s.total_hits == Some(42)));
    assert!(run.samples.iter().all(|s| s.started_at_micros > 0));
}

// ============================================================================
// Outcomes and query mix
// ============================================================================

#[tokio::test]
async fn test_error_classification() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let runner = ScenarioRunner::new(store, "reviews");
    let config = scenario(1, StopCondition::Iterations(300)).with_mix(vec![
        WeightedQuery {
            query: "match.json".into(),
            weight: 1.0,
        },
        WeightedQuery {
            query: "bad.json".into(),
            weight: 1.0,
        },
        WeightedQuery {
            query: "boom.json".into(),
            weight: 1.0,
        },
    ]);

    let summary = runner
        .run(&config, &catalog(&["match", "bad", "boom"]))
        .await
        .unwrap()
        .summary;

    assert_eq!(summary.total_requests, 300);
    assert_eq!(summary.errors.client_error, summary.per_query["bad.json"].requests);
    assert_eq!(summary.errors.server_error, summary.per_query["boom.json"].requests);
    assert_eq!(summary.success_count, summary.per_query["match.json"].successes);
    assert_eq!(summary.per_query["bad.json"].mean_ms, None);
    assert!(summary.success_rate < 1.0);
}

#[tokio::test]
async fn test_weighted_mix_proportions() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let runner = ScenarioRunner::new(store, "reviews");
    let config = scenario(2, StopCondition::Iterations(4000)).with_mix(vec![
        WeightedQuery {
            query: "heavy.json".into(),
            weight: 3.0,
        },
        WeightedQuery {
            query: "light.json".into(),
            weight: 1.0,
        },
    ]);

    let summary = runner
        .run(&config, &catalog(&["heavy", "light"]))
        .await
        .unwrap()
        .summary;

    let heavy = summary.per_query["heavy.json"].requests as f64;
    let share = heavy / summary.total_requests as f64;
    assert!((share - 0.75).abs() < 0.03, "heavy share was {share}");
}

#[tokio::test]
async fn test_unknown_template_in_mix_is_rejected() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let runner = ScenarioRunner::new(store.clone(), "reviews");
    let config = scenario(1, StopCondition::Iterations(1)).with_mix(vec![WeightedQuery {
        query: "missing.json".into(),
        weight: 1.0,
    }]);

    assert!(runner.run(&config, &catalog(&["match"])).await.is_err());
    assert_eq!(store.searches.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Scenario lifecycle
// ============================================================================

#[tokio::test]
async fn test_cache_clear_and_warmup_precede_measurement() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let runner = ScenarioRunner::new(store.clone(), "reviews");
    let mut config = scenario(2, StopCondition::Iterations(10));
    config.clear_cache = true;
    config.warmup_requests = 3;

    let summary = runner.run(&config, &catalog(&["a", "b", "c", "d"])).await.unwrap().summary;

    assert_eq!(store.cache_clears.load(Ordering::SeqCst), 1);
    // Warm-up queries reach the store but not the summary
    assert_eq!(store.searches.load(Ordering::SeqCst), 23);
    assert_eq!(summary.total_requests, 20);
}

#[tokio::test]
async fn test_ramp_up_spreads_worker_starts() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let runner = ScenarioRunner::new(store.clone(), "reviews");
    let config = scenario(4, StopCondition::Iterations(1)).with_ramp_up(Duration::from_millis(400));

    let summary = runner.run(&config, &catalog(&["match"])).await.unwrap().summary;

    assert_eq!(summary.total_requests, 4);
    let calls = store.calls.lock();
    let first = *calls.iter().min().unwrap();
    let last = *calls.iter().max().unwrap();
    // Worker 3 starts 300ms after worker 0
    assert!(last - first >= Duration::from_millis(250));
}

#[tokio::test]
async fn test_workers_starting_after_deadline_are_skipped() {
    let store = Arc::new(SearchStub::new(Duration::from_millis(5)));
    let runner = ScenarioRunner::new(store, "reviews");
    let config = scenario(4, StopCondition::Duration(Duration::from_millis(200)))
        .with_ramp_up(Duration::from_secs(4));

    let summary = runner.run(&config, &catalog(&["match"])).await.unwrap().summary;

    // Only worker 0 starts before the deadline
    assert!(summary.total_requests > 0);
    assert!(summary.total_requests <= 41);
    assert!(summary.elapsed_secs < 1.0);
}

#[tokio::test]
async fn test_client_sweep_runs_each_scenario() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let runner = ScenarioRunner::new(store, "reviews");
    let plan = BenchmarkPlan::client_sweep(&[1, 2, 4], &scenario(1, StopCondition::Iterations(5)));

    let runs = runner.run_plan(&plan, &catalog(&["match"])).await.unwrap();

    assert_eq!(runs.len(), 3);
    assert_eq!(runs[0].summary.scenario, "C01__clients_1");
    assert_eq!(runs[2].summary.scenario, "C03__clients_4");
    let totals: Vec<u64> = runs.iter().map(|r| r.summary.total_requests).collect();
    assert_eq!(totals, vec![5, 10, 20]);
}

#[tokio::test]
async fn test_cancelled_plan_runs_nothing() {
    let store = Arc::new(SearchStub::new(Duration::ZERO));
    let cancel = CancellationToken::new();
    cancel.cancel();
    let runner = ScenarioRunner::new(store.clone(), "reviews").with_cancellation(cancel);
    let plan = BenchmarkPlan::client_sweep(&[1, 2], &scenario(1, StopCondition::Iterations(5)));

    let runs = runner.run_plan(&plan, &catalog(&["match"])).await.unwrap();

    assert!(runs.is_empty());
    assert_eq!(store.searches.load(Ordering::SeqCst), 0);
}
