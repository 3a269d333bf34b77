//! review-loader - bulk review ingestion and query benchmarking
//!
//! Loads SNAP-format product reviews into an Elasticsearch-compatible
//! document store and measures query latency under concurrent load.
//!
//! # Architecture
//!
//! ```text
//! Ingestion:  ReviewSource ─► parse ─► normalize ─► batch ─► BulkIndexer ─► DocumentStore
//! Benchmark:  BenchmarkPlan ─► ScenarioRunner (workers) ─► DocumentStore ─► MetricsAggregator
//! ```
//!
//! Both domains reach the store only through the [`DocumentStore`] trait.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod backoff;
pub mod bench;
pub mod config;
pub mod document;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod metrics_server;
pub mod store;

pub use config::Config;
pub use document::{NormalizedDocument, RawRecord};
pub use error::{LoaderError, Result, StoreError};
pub use store::{DocumentStore, ElasticsearchStore, ItemOutcome, SearchResponse};
