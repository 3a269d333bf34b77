//! review-loader - bulk review ingestion and query benchmarking
//!
//! ## Usage
//!
//! ```bash
//! # Ingest a review dump (plain or .gz)
//! review-loader ingest data/Music.txt.gz
//!
//! # Run the client-count sweep against the query templates in ./queries
//! review-loader bench
//!
//! # JSON logs at debug level
//! LOADER_LOG_FORMAT=json LOADER_LOG_LEVEL=debug review-loader bench
//! ```
//!
//! ## Environment Variables
//!
//! - `ELASTIC_URL`: search engine base URL (default: "http://localhost:9200")
//! - `INDEX_NAME`: target index (default: "amazon-music-reviews")
//! - `DATASET_PATH`: review dump when no path argument is given
//! - `BULK_BATCH_SIZE`, `BULK_MAX_BYTES`, `BULK_ADMISSION_WINDOW`: bulk sizing
//! - `QUERY_DIR`, `SCENARIO_FILE`, `DURATION_PER_CLIENT`: benchmark setup
//! - `OUT_DIR`: write one `<scenario>.jsonl` request log per scenario here
//! - `LOADER_METRICS_PORT`: serve Prometheus metrics on this port
//! - `LOADER_LOG_LEVEL`: log level (default: "info")

use anyhow::Context;
use review_loader::bench::{QueryCatalog, ScenarioRunner};
use review_loader::config::{Config, LogFormat};
use review_loader::ingest::{IngestPipeline, ReviewSource, SessionState};
use review_loader::metrics::Metrics;
use review_loader::metrics_server::MetricsServer;
use review_loader::store::{DocumentStore, ElasticsearchStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: review-loader <ingest [PATH] | bench>";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let config = Config::from_env()?;
    init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = match args.first().map(String::as_str) {
        Some("ingest") => "ingest",
        Some("bench") => "bench",
        Some(other) => {
            eprintln!("unknown mode '{other}'\n{USAGE}");
            return Ok(ExitCode::from(2));
        }
        None => {
            eprintln!("{USAGE}");
            return Ok(ExitCode::from(2));
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let metrics_stop = CancellationToken::new();
    let metrics_server = match config.metrics_port {
        Some(port) => {
            Metrics::init()?;
            Some(MetricsServer::bind(port, mode).await?.serve(metrics_stop.clone()))
        }
        None => None,
    };

    let store = Arc::new(ElasticsearchStore::new(
        config.elastic_url.clone(),
        config.request_timeout,
    )?);
    if !store.health().await {
        warn!(url = %config.elastic_url, "Store health check failed, continuing");
    }

    let code = if mode == "ingest" {
        ingest(&config, store, args.get(1).cloned(), cancel).await?
    } else {
        bench(&config, store, cancel).await?
    };

    metrics_stop.cancel();
    if let Some(handle) = metrics_server {
        let _ = handle.await;
    }

    info!("review-loader finished");
    Ok(code)
}

async fn ingest(
    config: &Config,
    store: Arc<ElasticsearchStore>,
    path: Option<String>,
    cancel: CancellationToken,
) -> anyhow::Result<ExitCode> {
    let path = path
        .map(PathBuf::from)
        .or_else(|| config.dataset_path.clone())
        .context("no review dump given: pass a path or set DATASET_PATH")?;

    info!(
        url = %config.elastic_url,
        index = %config.index,
        path = %path.display(),
        "Starting ingestion run"
    );

    let pipeline = IngestPipeline::new(store, config.pipeline_config()).with_cancellation(cancel);
    let report = pipeline.run_source(&ReviewSource::new(path)).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.state == SessionState::Completed && report.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn bench(
    config: &Config,
    store: Arc<ElasticsearchStore>,
    cancel: CancellationToken,
) -> anyhow::Result<ExitCode> {
    let catalog = QueryCatalog::load_dir(&config.query_dir)?;
    let plan = config.benchmark_plan()?;

    info!(
        url = %config.elastic_url,
        index = %config.index,
        templates = catalog.len(),
        scenarios = plan.scenarios.len(),
        "Starting benchmark run"
    );

    let runner = ScenarioRunner::new(store, config.index.clone()).with_cancellation(cancel.clone());
    let runs = runner.run_plan(&plan, &catalog).await?;

    if let Some(dir) = &config.out_dir {
        for run in &runs {
            let path = run.write_samples(dir)?;
            info!(scenario = %run.summary.scenario, path = %path.display(), "Request log written");
        }
    }

    let summaries: Vec<_> = runs.iter().map(|run| &run.summary).collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);

    Ok(if cancel.is_cancelled() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = ?e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    // In-flight requests finish; no new work is started
    cancel.cancel();
}
