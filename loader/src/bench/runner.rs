//! Concurrent scenario execution
//!
//! Each scenario spawns exactly `concurrency` workers. Workers share nothing
//! but the sample channel into the aggregator task. A scenario-level
//! deadline cuts off requests still in flight when the duration elapses and
//! records them as timeouts.
//!
//! A run yields the summary plus every per-request sample, which
//! [`ScenarioRun::write_samples`] stores as JSON lines.

use crate::bench::aggregator::{LatencySample, MetricsAggregator, SampleOutcome, ScenarioSummary};
use crate::bench::catalog::{QueryCatalog, QueryMix};
use crate::bench::scenario::{BenchmarkPlan, ScenarioConfig, StopCondition};
use crate::error::{LoaderError, Result};
use crate::metrics;
use crate::store::{DocumentStore, SearchResponse};
use chrono::Utc;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Samples buffered between workers and the collector task
const SAMPLE_QUEUE: usize = 4096;

/// Outcome of one scenario: the summary and the raw samples behind it
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub summary: ScenarioSummary,
    pub samples: Vec<LatencySample>,
}

/// One line of a per-request log
#[derive(Serialize)]
struct SampleLine<'a> {
    scenario: &'a str,
    #[serde(flatten)]
    sample: &'a LatencySample,
}

impl ScenarioRun {
    /// Write every sample as one JSON line to `{dir}/{scenario}.jsonl`,
    /// creating `dir` if needed. Returns the file path.
    pub fn write_samples(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.jsonl", self.summary.scenario));
        let mut out = BufWriter::new(File::create(&path)?);
        for sample in &self.samples {
            serde_json::to_writer(
                &mut out,
                &SampleLine {
                    scenario: &self.summary.scenario,
                    sample,
                },
            )?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        debug!(path = %path.display(), samples = self.samples.len(), "Wrote request log");
        Ok(path)
    }
}

/// Start offset of worker `worker` when starts are spread over `ramp_up`
pub fn start_offset(ramp_up: Option<Duration>, worker: usize, concurrency: usize) -> Duration {
    match ramp_up {
        Some(ramp) if concurrency > 0 => {
            let nanos = ramp.as_nanos() * worker as u128 / concurrency as u128;
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
        _ => Duration::ZERO,
    }
}

/// Drives benchmark scenarios against a [`DocumentStore`]
pub struct ScenarioRunner {
    store: Arc<dyn DocumentStore>,
    index: String,
    cancel: CancellationToken,
}

/// Everything a worker needs, shared read-only
struct WorkerContext {
    store: Arc<dyn DocumentStore>,
    index: String,
    scenario: String,
    mix: QueryMix,
    stop: StopCondition,
    request_timeout: Duration,
    started: Instant,
    deadline: Option<Instant>,
    ramp_up: Option<Duration>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl ScenarioRunner {
    pub fn new(store: Arc<dyn DocumentStore>, index: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop workers early when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run every scenario of `plan` in order, stopping early on cancellation
    pub async fn run_plan(
        &self,
        plan: &BenchmarkPlan,
        catalog: &QueryCatalog,
    ) -> Result<Vec<ScenarioRun>> {
        plan.validate()?;
        let mut runs = Vec::with_capacity(plan.scenarios.len());
        for scenario in &plan.scenarios {
            if self.cancel.is_cancelled() {
                warn!(scenario = %scenario.name, "Benchmark cancelled, skipping remaining scenarios");
                break;
            }
            runs.push(self.run(scenario, catalog).await?);
        }
        Ok(runs)
    }

    /// Run one scenario: optional cache clear, warm-up, then the measured phase
    pub async fn run(&self, config: &ScenarioConfig, catalog: &QueryCatalog) -> Result<ScenarioRun> {
        config.validate()?;
        let mix = catalog.mix(&config.query_mix)?;

        if config.clear_cache {
            if let Err(e) = self.store.clear_cache(&self.index).await {
                warn!(index = %self.index, error = %e, "Cache clear failed, continuing");
            }
        }
        self.warmup(config, &mix).await;

        info!(
            scenario = %config.name,
            concurrency = config.concurrency,
            templates = mix.len(),
            "Starting scenario"
        );

        let (tx, mut rx) = mpsc::channel::<LatencySample>(SAMPLE_QUEUE);
        let collector = tokio::spawn(async move {
            let mut aggregator = MetricsAggregator::new();
            while let Some(sample) = rx.recv().await {
                aggregator.record(sample);
            }
            aggregator
        });

        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().r#gen());
        let started = Instant::now();
        let ctx = Arc::new(WorkerContext {
            store: Arc::clone(&self.store),
            index: self.index.clone(),
            scenario: config.name.clone(),
            mix,
            stop: config.stop,
            request_timeout: config.request_timeout,
            started,
            deadline: config.duration().map(|d| started + d),
            ramp_up: config.ramp_up,
            concurrency: config.concurrency,
            cancel: self.cancel.child_token(),
        });

        let workers: Vec<_> = (0..config.concurrency)
            .map(|id| {
                let ctx = Arc::clone(&ctx);
                let tx = tx.clone();
                let rng = StdRng::seed_from_u64(seed.wrapping_add(id as u64));
                tokio::spawn(async move { worker(ctx, id, rng, tx).await })
            })
            .collect();
        drop(tx);

        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!(scenario = %config.name, error = %e, "Benchmark worker failed");
            }
        }
        let elapsed = started.elapsed();

        let aggregator = collector
            .await
            .map_err(|e| LoaderError::Aborted(format!("sample collector failed: {e}")))?;
        let summary = aggregator.summarize(&config.name, config.concurrency, elapsed);

        info!(
            scenario = %summary.scenario,
            requests = summary.total_requests,
            success_rate = summary.success_rate,
            rps = summary.throughput_rps,
            p95_ms = ?summary.latency.p95_ms,
            "Scenario finished"
        );
        Ok(ScenarioRun {
            summary,
            samples: aggregator.into_samples(),
        })
    }

    /// Unmeasured queries over the first templates of the mix; failures ignored
    async fn warmup(&self, config: &ScenarioConfig, mix: &QueryMix) {
        for template in mix.warmup(config.warmup_requests) {
            if self.cancel.is_cancelled() {
                return;
            }
            match timeout(config.request_timeout, self.store.search(&self.index, &template.body)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(template = %template.id, error = %e, "Warm-up query failed"),
                Err(_) => debug!(template = %template.id, "Warm-up query timed out"),
            }
        }
    }
}

/// Resolves at the scenario deadline, or never when iteration-bounded
async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn worker(
    ctx: Arc<WorkerContext>,
    id: usize,
    mut rng: StdRng,
    tx: mpsc::Sender<LatencySample>,
) {
    let offset = start_offset(ctx.ramp_up, id, ctx.concurrency);
    if !offset.is_zero() {
        let start_at = ctx.started + offset;
        if ctx.deadline.is_some_and(|d| start_at >= d) {
            return;
        }
        tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            _ = sleep_until(start_at) => {}
        }
    }

    let mut issued = 0u64;
    loop {
        if let StopCondition::Iterations(limit) = ctx.stop {
            if issued >= limit {
                break;
            }
        }
        if ctx.cancel.is_cancelled() || ctx.deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }

        let template = ctx.mix.pick(&mut rng);
        let started_at_micros = Utc::now().timestamp_micros();
        let t0 = Instant::now();

        let result: std::result::Result<SearchResponse, SampleOutcome> = tokio::select! {
            biased;
            response = timeout(ctx.request_timeout, ctx.store.search(&ctx.index, &template.body)) => {
                match response {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(e)) => Err(SampleOutcome::from_error(&e)),
                    Err(_) => Err(SampleOutcome::Timeout),
                }
            }
            _ = deadline_reached(ctx.deadline) => Err(SampleOutcome::Timeout),
            _ = ctx.cancel.cancelled() => Err(SampleOutcome::Timeout),
        };
        issued += 1;

        let duration = t0.elapsed();
        let (outcome, response) = match result {
            Ok(response) => (SampleOutcome::Success, response),
            Err(outcome) => (outcome, SearchResponse::default()),
        };
        metrics::try_record_bench(&ctx.scenario, outcome.as_str(), duration.as_secs_f64());

        let sample = LatencySample {
            query_id: template.id.clone(),
            worker: id,
            started_at_micros,
            duration_micros: u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
            outcome,
            took_ms: response.took_ms,
            total_hits: response.total_hits,
        };
        if tx.send(sample).await.is_err() {
            break;
        }
    }

    debug!(scenario = %ctx.scenario, worker = id, issued, "Benchmark worker stopped");
}
