//! Bounded log of documents that could not be indexed
//!
//! Kept in memory for the final report only. When full, the oldest entries
//! are dropped and counted so the totals stay exact.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a document ended up in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The store refused the document outright
    Rejected,
    /// Transient failures outlasted the retry bound
    RetriesExhausted,
    /// The source block failed validation
    Invalid,
}

/// One failed document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    /// Document id, or `line:<n>` for blocks that never became documents
    pub document_id: String,
    pub kind: FailureKind,
    /// Last error reported for the document
    pub reason: String,
    /// Submissions made, including the initial one
    pub attempts: u32,
}

/// Capacity-bounded failure log
pub struct FailureLog {
    entries: Mutex<VecDeque<DocumentFailure>>,
    capacity: usize,
    total_captured: AtomicU64,
    total_dropped: AtomicU64,
}

impl FailureLog {
    /// Create a log retaining at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            total_captured: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    /// Append one failure, evicting the oldest when full
    pub fn push(&self, failure: DocumentFailure) {
        self.total_captured.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(failure);
    }

    /// Copy of the retained entries, oldest first
    pub fn snapshot(&self) -> Vec<DocumentFailure> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Retained entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Failures ever pushed
    pub fn total_captured(&self) -> u64 {
        self.total_captured.load(Ordering::Relaxed)
    }

    /// Failures evicted because of capacity
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }
}
