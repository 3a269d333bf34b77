//! Review ingestion
//!
//! Turns a review dump into bulk writes against a [`DocumentStore`]. Each
//! stage is usable on its own; [`IngestPipeline`] wires them together for a
//! single bounded pass over one source.
//!
//! [`DocumentStore`]: crate::store::DocumentStore

pub mod batcher;
pub mod failure_log;
pub mod indexer;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod session;

pub use batcher::{Batch, BatchLimits, Batcher};
pub use failure_log::{DocumentFailure, FailureKind, FailureLog};
pub use indexer::{BulkIndexer, IndexerConfig};
pub use normalizer::normalize;
pub use parser::{RecordParser, ReviewSource};
pub use pipeline::{IngestPipeline, PipelineConfig};
pub use session::{FailurePolicy, IngestReport, IngestionSession, SessionState};
