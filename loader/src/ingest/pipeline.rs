//! End-to-end ingestion: parse, normalize, batch, index
//!
//! ```text
//! ReviewSource ─► RecordParser ─► normalize ─► Batcher ─► mpsc ─► BulkIndexer ─► DocumentStore
//!                 └──────────── blocking thread ──────────┘       (window workers)
//! ```

use crate::backoff::BackoffConfig;
use crate::ingest::batcher::{Batch, BatchLimits, Batcher};
use crate::ingest::indexer::{BulkIndexer, IndexerConfig};
use crate::ingest::normalizer::normalize;
use crate::ingest::parser::{RecordParser, ReviewSource};
use crate::ingest::session::{FailurePolicy, IngestReport, IngestionSession};
use crate::store::DocumentStore;
use std::io::{self, BufRead};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Ingestion settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub index: String,
    pub limits: BatchLimits,
    /// Batches buffered between the batcher and the indexer
    pub queue_capacity: usize,
    pub admission_window: usize,
    pub backoff: BackoffConfig,
    pub failure_policy: FailurePolicy,
    /// Failures retained for the report
    pub failure_log_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            index: "amazon-music-reviews".to_string(),
            limits: BatchLimits::default(),
            queue_capacity: 8,
            admission_window: 4,
            backoff: BackoffConfig::default(),
            failure_policy: FailurePolicy::default(),
            failure_log_capacity: 1000,
        }
    }
}

impl PipelineConfig {
    fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            index: self.index.clone(),
            admission_window: self.admission_window,
            max_batch_docs: self.limits.max_docs,
            backoff: self.backoff.clone(),
        }
    }
}

/// Single-pass ingestion of one review source into one index
pub struct IngestPipeline {
    store: Arc<dyn DocumentStore>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl IngestPipeline {
    pub fn new(store: Arc<dyn DocumentStore>, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run when `cancel` fires. In-flight requests still finish.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn new_session(&self) -> IngestionSession {
        IngestionSession::new(
            self.config.failure_policy,
            self.config.failure_log_capacity,
            self.cancel.child_token(),
        )
    }

    /// Open `source` and ingest it. An unopenable source aborts the session.
    pub async fn run_source(&self, source: &ReviewSource) -> IngestReport {
        match source.open() {
            Ok(parser) => {
                info!(path = %source.path().display(), gzip = source.is_gzip(), "Opened review source");
                self.run(parser).await
            }
            Err(e) => {
                let session = self.new_session();
                session.abort(format!(
                    "source unreadable: {}: {e}",
                    source.path().display()
                ));
                session.report()
            }
        }
    }

    /// Ingest every record `parser` yields
    pub async fn run<R>(&self, parser: RecordParser<R>) -> IngestReport
    where
        R: BufRead + Send + 'static,
    {
        let session = Arc::new(self.new_session());
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));

        info!(
            index = %self.config.index,
            batch_docs = self.config.limits.max_docs,
            batch_bytes = self.config.limits.max_bytes,
            window = self.config.admission_window,
            "Starting ingestion"
        );

        let producer = {
            let session = Arc::clone(&session);
            let limits = self.config.limits;
            tokio::task::spawn_blocking(move || produce(parser, limits, tx, &session))
        };

        BulkIndexer::new(
            Arc::clone(&self.store),
            Arc::clone(&session),
            self.config.indexer_config(),
        )
        .run(rx)
        .await;

        if let Err(e) = producer.await {
            session.abort(format!("batch producer failed: {e}"));
        }

        if session.is_cancelled() {
            session.abort("ingestion cancelled");
        } else {
            session.complete();
        }
        session.report()
    }
}

/// Parse, normalize and batch on a blocking thread, feeding the queue
fn produce<R: BufRead>(
    mut parser: RecordParser<R>,
    limits: BatchLimits,
    tx: mpsc::Sender<Batch>,
    session: &IngestionSession,
) {
    let mut read_error: Option<io::Error> = None;
    let mut sent = 0u64;

    {
        let records = parser
            .by_ref()
            .map_while(|item| item.map_err(|e| read_error = Some(e)).ok());
        let docs = records.filter_map(|record| match normalize(&record) {
            Ok(doc) => Some(doc),
            Err(e) => {
                debug!(line = record.line, error = %e, "Rejected review");
                session.record_rejected(record.line, e.to_string());
                None
            }
        });

        for batch in Batcher::new(docs, limits) {
            if session.is_cancelled() || tx.blocking_send(batch).is_err() {
                break;
            }
            sent += 1;
        }
    }

    session.record_skipped_lines(parser.skipped_lines());
    debug!(
        records = parser.records(),
        batches = sent,
        skipped_lines = parser.skipped_lines(),
        "Batch producer finished"
    );

    if let Some(e) = read_error {
        session.abort(format!("source unreadable: {e}"));
    }
}
