//! Concurrent query benchmark
//!
//! A [`ScenarioRunner`] drives `concurrency` workers issuing weighted random
//! queries from a [`QueryCatalog`] and reduces their samples to a
//! [`ScenarioSummary`]. A [`BenchmarkPlan`] runs scenarios back to back.

pub mod aggregator;
pub mod catalog;
pub mod runner;
pub mod scenario;

pub use aggregator::{
    LatencySample, LatencyStats, MetricsAggregator, SampleOutcome, ScenarioSummary, nearest_rank,
};
pub use catalog::{QueryCatalog, QueryMix, QueryTemplate};
pub use runner::{ScenarioRun, ScenarioRunner, start_offset};
pub use scenario::{BenchmarkPlan, DEFAULT_CLIENT_SWEEP, ScenarioConfig, StopCondition, WeightedQuery};
