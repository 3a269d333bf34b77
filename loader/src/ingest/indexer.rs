//! Bulk submission with bounded concurrency and per-document retries
//!
//! A fixed pool of `admission_window` workers shares the batch queue. Each
//! worker has at most one bulk request outstanding, so the window bounds the
//! requests in flight. Documents that fail transiently go to the session's
//! retry queue and are resubmitted by whichever worker is free once their
//! backoff elapses.

use crate::backoff::BackoffConfig;
use crate::document::NormalizedDocument;
use crate::ingest::batcher::Batch;
use crate::ingest::failure_log::{DocumentFailure, FailureKind};
use crate::ingest::session::{IngestionSession, PendingDocument};
use crate::metrics;
use crate::store::{DocumentStore, ItemOutcome};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// How often idle workers re-check the retry queue
const IDLE_POLL: Duration = Duration::from_millis(25);

/// Bulk indexer settings
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Target index name
    pub index: String,
    /// Maximum concurrent bulk requests
    pub admission_window: usize,
    /// Maximum documents resubmitted together from the retry queue
    pub max_batch_docs: usize,
    pub backoff: BackoffConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            index: "amazon-music-reviews".to_string(),
            admission_window: 4,
            max_batch_docs: 1000,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Submits batches to a [`DocumentStore`] on behalf of a session
#[derive(Clone)]
pub struct BulkIndexer {
    store: Arc<dyn DocumentStore>,
    session: Arc<IngestionSession>,
    config: Arc<IndexerConfig>,
}

impl BulkIndexer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        session: Arc<IngestionSession>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            store,
            session,
            config: Arc::new(config),
        }
    }

    /// Drain `batches` and the retry queue, returning once both are empty
    /// and nothing is in flight, or once the session is cancelled.
    pub async fn run(&self, batches: mpsc::Receiver<Batch>) {
        let window = self.config.admission_window.max(1);
        let batches = Arc::new(Mutex::new(batches));
        let input_open = Arc::new(AtomicBool::new(true));

        info!(
            store = self.store.name(),
            index = %self.config.index,
            window,
            "Starting bulk indexer"
        );

        let workers: Vec<_> = (0..window)
            .map(|id| {
                let this = self.clone();
                let batches = Arc::clone(&batches);
                let input_open = Arc::clone(&input_open);
                tokio::spawn(async move { this.worker(id, batches, input_open).await })
            })
            .collect();

        for result in join_all(workers).await {
            if let Err(e) = result {
                self.session.abort(format!("indexer worker failed: {e}"));
            }
        }
    }

    async fn worker(
        self,
        id: usize,
        batches: Arc<Mutex<mpsc::Receiver<Batch>>>,
        input_open: Arc<AtomicBool>,
    ) {
        let cancel = self.session.cancel_token().clone();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let ready = self
                .session
                .take_ready_retries(self.config.max_batch_docs.max(1), Instant::now());
            if !ready.is_empty() {
                debug!(worker = id, count = ready.len(), "Resubmitting documents");
                self.submit(ready).await;
                continue;
            }

            let wake = match self.session.next_retry_at() {
                Some(at) => at.min(Instant::now() + IDLE_POLL),
                None => Instant::now() + IDLE_POLL,
            };

            if input_open.load(Ordering::Acquire) {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep_until(wake) => continue,
                    batch = async { batches.lock().await.recv().await } => batch,
                };

                match received {
                    Some(batch) => {
                        debug!(worker = id, seq = batch.seq(), docs = batch.len(), "Submitting batch");
                        self.session.record_submitted(batch.len() as u64);
                        let now = Instant::now();
                        let pending = batch
                            .into_docs()
                            .into_iter()
                            .map(|doc| PendingDocument {
                                doc,
                                retries: 0,
                                ready_at: now,
                                last_error: String::new(),
                            })
                            .collect();
                        self.submit(pending).await;
                    }
                    None => input_open.store(false, Ordering::Release),
                }
            } else {
                if self.session.retry_queue_len() == 0 && self.session.in_flight() == 0 {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep_until(wake) => {}
                }
            }
        }

        debug!(worker = id, "Bulk worker stopped");
    }

    /// Issue one bulk request and settle every document in it.
    ///
    /// The in-flight guard is held until retries are enqueued, so an idle
    /// worker never observes an empty queue with work still unsettled.
    async fn submit(&self, pending: Vec<PendingDocument>) {
        let _in_flight = self.session.begin_request();
        let started = std::time::Instant::now();

        let docs: Vec<&NormalizedDocument> = pending.iter().map(|p| &p.doc).collect();
        let result = self.store.bulk_index(&self.config.index, &docs).await;
        let elapsed = started.elapsed().as_secs_f64();

        let outcomes = match result {
            Ok(mut outcomes) => {
                if outcomes.len() != pending.len() {
                    warn!(
                        expected = pending.len(),
                        received = outcomes.len(),
                        "Bulk response item count mismatch"
                    );
                }
                outcomes.resize(
                    pending.len(),
                    ItemOutcome::Retryable("missing bulk item".to_string()),
                );
                let result = if outcomes.iter().all(ItemOutcome::is_success) {
                    "ok"
                } else {
                    "partial"
                };
                metrics::try_record_bulk(result, elapsed);
                outcomes
            }
            Err(e) => {
                warn!(
                    store = self.store.name(),
                    docs = pending.len(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "Bulk request failed"
                );
                metrics::try_record_bulk("error", elapsed);
                let outcome = if e.is_retryable() {
                    ItemOutcome::Retryable(e.to_string())
                } else {
                    ItemOutcome::Terminal(e.to_string())
                };
                vec![outcome; pending.len()]
            }
        };

        let mut succeeded = 0u64;
        for (mut item, outcome) in pending.into_iter().zip(outcomes) {
            match outcome {
                ItemOutcome::Success => succeeded += 1,
                ItemOutcome::Terminal(reason) => {
                    self.session.record_failed(DocumentFailure {
                        document_id: item.doc.document_id,
                        kind: FailureKind::Rejected,
                        reason,
                        attempts: item.retries + 1,
                    });
                }
                ItemOutcome::Retryable(reason) if self.config.backoff.allows_retry(item.retries) => {
                    item.retries += 1;
                    item.ready_at = Instant::now() + self.config.backoff.delay_for(item.retries);
                    item.last_error = reason;
                    self.session.record_retry();
                    self.session.enqueue_retry(item);
                }
                ItemOutcome::Retryable(reason) => {
                    self.session.record_failed(DocumentFailure {
                        document_id: item.doc.document_id,
                        kind: FailureKind::RetriesExhausted,
                        reason,
                        attempts: item.retries + 1,
                    });
                }
            }
        }

        self.session.record_succeeded(succeeded);
        self.session.check_failure_rate();
    }
}
