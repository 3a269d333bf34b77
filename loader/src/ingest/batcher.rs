//! Size-bounded batching of normalized documents
//!
//! Batches close when they reach the item limit or the byte estimate, and
//! the final partial batch is always emitted. Order is preserved within and
//! across batches.

use crate::document::NormalizedDocument;

/// Bytes of the `{"index":{"_id":"..."}}` action line around each id
const ACTION_LINE_OVERHEAD: usize = 24;

/// Limits that close a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum documents per batch
    pub max_docs: usize,
    /// Maximum estimated request bytes per batch
    pub max_bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_docs: 1000,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

/// An immutable group of documents bound for one bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    seq: u64,
    docs: Vec<NormalizedDocument>,
    estimated_bytes: usize,
}

impl Batch {
    /// Position of this batch in emission order, starting at 0
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Documents in source order
    pub fn docs(&self) -> &[NormalizedDocument] {
        &self.docs
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Always false for batches produced by [`Batcher`]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Estimated bulk request size
    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// Take ownership of the documents
    pub fn into_docs(self) -> Vec<NormalizedDocument> {
        self.docs
    }
}

/// Estimated bulk request bytes contributed by one document
pub fn estimate_bytes(doc: &NormalizedDocument) -> usize {
    let body = doc.to_json().map(|s| s.len()).unwrap_or(0);
    body + 1 + doc.document_id.len() + ACTION_LINE_OVERHEAD
}

/// Iterator adapter turning documents into [`Batch`]es
pub struct Batcher<I> {
    inner: I,
    limits: BatchLimits,
    pending: Vec<NormalizedDocument>,
    pending_bytes: usize,
    next_seq: u64,
}

impl<I> Batcher<I>
where
    I: Iterator<Item = NormalizedDocument>,
{
    /// Wrap a document iterator. Limits of zero are treated as one.
    pub fn new(inner: I, limits: BatchLimits) -> Self {
        let limits = BatchLimits {
            max_docs: limits.max_docs.max(1),
            max_bytes: limits.max_bytes.max(1),
        };
        Self {
            inner,
            limits,
            pending: Vec::with_capacity(limits.max_docs.min(4096)),
            pending_bytes: 0,
            next_seq: 0,
        }
    }

    fn take_batch(&mut self) -> Batch {
        let docs = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.limits.max_docs.min(4096)),
        );
        let batch = Batch {
            seq: self.next_seq,
            docs,
            estimated_bytes: self.pending_bytes,
        };
        self.next_seq += 1;
        self.pending_bytes = 0;
        batch
    }
}

impl<I> Iterator for Batcher<I>
where
    I: Iterator<Item = NormalizedDocument>,
{
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        loop {
            if self.pending.len() >= self.limits.max_docs {
                return Some(self.take_batch());
            }

            let Some(doc) = self.inner.next() else {
                return (!self.pending.is_empty()).then(|| self.take_batch());
            };

            let size = estimate_bytes(&doc);
            let overflow =
                !self.pending.is_empty() && self.pending_bytes + size > self.limits.max_bytes;
            let closed = overflow.then(|| self.take_batch());

            self.pending.push(doc);
            self.pending_bytes += size;

            if closed.is_some() {
                return closed;
            }
            if self.pending_bytes >= self.limits.max_bytes {
                return Some(self.take_batch());
            }
        }
    }
}
