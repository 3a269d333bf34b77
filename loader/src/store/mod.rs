//! Document store seam
//!
//! The indexer and the benchmark runner talk to the search engine only
//! through [`DocumentStore`], so tests can swap in stubs.

pub mod elasticsearch;

use crate::document::NormalizedDocument;
use crate::error::StoreError;
use async_trait::async_trait;

pub use elasticsearch::ElasticsearchStore;

/// Per-document result of a bulk write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    /// Transient failure; resubmission may succeed
    Retryable(String),
    /// Permanent rejection; never resubmitted
    Terminal(String),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success)
    }

    /// Classify a bulk item by its HTTP status
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        match status {
            200..=299 => ItemOutcome::Success,
            429 | 500..=599 => ItemOutcome::Retryable(reason.into()),
            _ => ItemOutcome::Terminal(reason.into()),
        }
    }
}

/// Figures extracted from a search response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchResponse {
    /// Server-side execution time in milliseconds
    pub took_ms: Option<u64>,
    pub total_hits: Option<u64>,
}

/// A search engine accepting bulk writes and queries
///
/// # Example
///
/// ```ignore
/// struct NullStore;
///
/// #[async_trait]
/// impl DocumentStore for NullStore {
///     fn name(&self) -> &'static str { "null" }
///
///     async fn bulk_index(&self, _: &str, docs: &[&NormalizedDocument])
///         -> Result<Vec<ItemOutcome>, StoreError> {
///         Ok(vec![ItemOutcome::Success; docs.len()])
///     }
///
///     async fn search(&self, _: &str, _: &serde_json::Value)
///         -> Result<SearchResponse, StoreError> {
///         Ok(SearchResponse::default())
///     }
///
///     async fn health(&self) -> bool { true }
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store name for identification and logging
    fn name(&self) -> &'static str;

    /// Upsert documents keyed by their document id.
    ///
    /// On `Ok`, the outcome list is in request order and one entry per
    /// document. `Err` means the whole request failed.
    async fn bulk_index(
        &self,
        index: &str,
        docs: &[&NormalizedDocument],
    ) -> Result<Vec<ItemOutcome>, StoreError>;

    /// Run one query body against an index
    async fn search(
        &self,
        index: &str,
        body: &serde_json::Value,
    ) -> Result<SearchResponse, StoreError>;

    /// Drop the index's query caches
    async fn clear_cache(&self, _index: &str) -> Result<(), StoreError> {
        Ok(())
    }

    /// Whether the store is reachable
    async fn health(&self) -> bool;
}
