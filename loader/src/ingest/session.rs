//! Run-scoped coordinator for one ingestion pass
//!
//! Owns the counters, the retry queue, the failure logs and the terminal
//! state. Workers share it through an `Arc`; counters are atomics and the
//! retry queue lock is never held across a store request.
//!
//! Store failures and validation rejections are logged separately, so a
//! source full of malformed blocks cannot evict store failures from the
//! report.

use crate::document::NormalizedDocument;
use crate::ingest::failure_log::{DocumentFailure, FailureKind, FailureLog};
use crate::metrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::cmp;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const ABORTED: u8 = 2;

/// Lifecycle of a session. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Completed,
    Aborted,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            COMPLETED => SessionState::Completed,
            ABORTED => SessionState::Aborted,
            _ => SessionState::Running,
        }
    }
}

/// Threshold on terminal store failures that aborts the run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailurePolicy {
    /// Abort when failed / (succeeded + failed) exceeds this
    pub max_failure_rate: f64,
    /// Resolved documents required before the rate is evaluated
    pub min_resolved: u64,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_failure_rate: 0.05,
            min_resolved: 1000,
        }
    }
}

/// A document waiting for its next submission
#[derive(Debug, Clone)]
pub struct PendingDocument {
    pub doc: NormalizedDocument,
    /// Retries already scheduled for this document
    pub retries: u32,
    /// Not to be resubmitted before this instant
    pub ready_at: Instant,
    pub last_error: String,
}

/// Final accounting of a session
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub state: SessionState,
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Blocks that failed validation
    pub rejected: u64,
    pub retries: u64,
    /// Source lines skipped by the parser
    pub skipped_lines: u64,
    /// Documents still queued for retry when the session ended
    pub pending_retries: usize,
    pub peak_in_flight: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Terminal store failures
    pub failures: Vec<DocumentFailure>,
    /// Failures not retained in `failures` because the log was full
    pub failures_dropped: u64,
    /// Blocks that failed validation, keyed `line:N`
    pub rejections: Vec<DocumentFailure>,
    pub rejections_dropped: u64,
    pub elapsed_secs: f64,
}

impl IngestReport {
    /// Whether every submitted document was indexed
    pub fn is_clean(&self) -> bool {
        self.state == SessionState::Completed && self.failed == 0 && self.pending_retries == 0
    }
}

/// Retry queue entry, ordered so the earliest `ready_at` pops first.
/// Ties pop in enqueue order.
struct Scheduled {
    seq: u64,
    pending: PendingDocument,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        // BinaryHeap is a max-heap
        other
            .pending
            .ready_at
            .cmp(&self.pending.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct RetryQueue {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

/// Shared state of one ingestion run
pub struct IngestionSession {
    state: AtomicU8,
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    retries: AtomicU64,
    skipped_lines: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
    retry_queue: Mutex<RetryQueue>,
    terminal_error: Mutex<Option<String>>,
    failures: FailureLog,
    rejections: FailureLog,
    policy: FailurePolicy,
    cancel: CancellationToken,
    started: std::time::Instant,
}

impl IngestionSession {
    /// `failure_capacity` bounds the store-failure log and the rejection
    /// log independently.
    pub fn new(policy: FailurePolicy, failure_capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            submitted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            skipped_lines: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            peak_in_flight: AtomicU64::new(0),
            retry_queue: Mutex::new(RetryQueue::default()),
            terminal_error: Mutex::new(None),
            failures: FailureLog::new(failure_capacity),
            rejections: FailureLog::new(failure_capacity),
            policy,
            cancel,
            started: std::time::Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Token cancelled when the session aborts
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // Counters

    /// Count documents on their first submission
    pub fn record_submitted(&self, count: u64) {
        self.submitted.fetch_add(count, Ordering::Relaxed);
        metrics::try_record_documents("submitted", count);
    }

    pub fn record_succeeded(&self, count: u64) {
        self.succeeded.fetch_add(count, Ordering::Relaxed);
        metrics::try_record_documents("succeeded", count);
    }

    /// Count a terminal store failure and log it
    pub fn record_failed(&self, failure: DocumentFailure) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::try_record_documents("failed", 1);
        self.failures.push(failure);
    }

    /// Count a block that failed validation
    pub fn record_rejected(&self, line: usize, reason: String) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::try_record_documents("rejected", 1);
        self.rejections.push(DocumentFailure {
            document_id: format!("line:{line}"),
            kind: FailureKind::Invalid,
            reason,
            attempts: 0,
        });
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        metrics::try_record_documents("retried", 1);
    }

    pub fn record_skipped_lines(&self, count: u64) {
        self.skipped_lines.fetch_add(count, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn peak_in_flight(&self) -> u64 {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Mark a bulk request as in flight until the guard drops
    pub fn begin_request(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
        metrics::try_set_in_flight(now);
        InFlightGuard { session: self }
    }

    // Retry queue

    pub fn enqueue_retry(&self, pending: PendingDocument) {
        let mut queue = self.retry_queue.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.heap.push(Scheduled { seq, pending });
    }

    /// Remove up to `max` documents whose backoff has elapsed at `now`,
    /// earliest first
    pub fn take_ready_retries(&self, max: usize, now: Instant) -> Vec<PendingDocument> {
        let mut queue = self.retry_queue.lock();
        let mut ready = Vec::new();
        while ready.len() < max {
            match queue.heap.peek() {
                Some(next) if next.pending.ready_at <= now => {}
                _ => break,
            }
            if let Some(entry) = queue.heap.pop() {
                ready.push(entry.pending);
            }
        }
        ready
    }

    /// Earliest instant at which a queued retry becomes due
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retry_queue.lock().heap.peek().map(|e| e.pending.ready_at)
    }

    pub fn retry_queue_len(&self) -> usize {
        self.retry_queue.lock().heap.len()
    }

    // Terminal transitions

    /// Move to `Aborted` and cancel outstanding work. Returns false if the
    /// session already reached a terminal state.
    pub fn abort(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        if self
            .state
            .compare_exchange(RUNNING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        warn!(reason = %reason, "Ingestion session aborted");
        *self.terminal_error.lock() = Some(reason);
        self.cancel.cancel();
        true
    }

    /// Move to `Completed`. Returns false if already terminal.
    pub fn complete(&self) -> bool {
        let won = self
            .state
            .compare_exchange(RUNNING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            info!(
                submitted = self.submitted(),
                succeeded = self.succeeded(),
                failed = self.failed(),
                "Ingestion session completed"
            );
        }
        won
    }

    /// Abort if the terminal-failure rate crossed the policy threshold
    pub fn check_failure_rate(&self) -> bool {
        let failed = self.failed();
        let resolved = self.succeeded() + failed;
        if resolved == 0 || resolved < self.policy.min_resolved {
            return false;
        }
        let rate = failed as f64 / resolved as f64;
        if rate > self.policy.max_failure_rate {
            return self.abort(format!(
                "failure rate {rate:.4} exceeds {:.4} after {resolved} documents",
                self.policy.max_failure_rate
            ));
        }
        false
    }

    pub fn terminal_error(&self) -> Option<String> {
        self.terminal_error.lock().clone()
    }

    /// Snapshot the session into a report
    pub fn report(&self) -> IngestReport {
        IngestReport {
            state: self.state(),
            submitted: self.submitted(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            rejected: self.rejected.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            skipped_lines: self.skipped_lines.load(Ordering::Relaxed),
            pending_retries: self.retry_queue_len(),
            peak_in_flight: self.peak_in_flight(),
            abort_reason: self.terminal_error(),
            failures: self.failures.snapshot(),
            failures_dropped: self.failures.total_dropped(),
            rejections: self.rejections.snapshot(),
            rejections_dropped: self.rejections.total_dropped(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

/// Decrements the in-flight count on drop
pub struct InFlightGuard<'a> {
    session: &'a IngestionSession,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let now = self.session.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::try_set_in_flight(now);
    }
}
