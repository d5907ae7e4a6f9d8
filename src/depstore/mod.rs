//! Service dependency storage.
//!
//! Call edges between services are derived from written spans, merged into
//! per-pair counts and persisted as additive increments on hour buckets.
//! Reads sum the buckets of a time window client-side.

use crate::core::{DependencyLink, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod aggregator;
pub mod derive;
pub mod model;
pub mod reader;
pub mod writer;

pub use aggregator::DependencyAggregator;
pub use derive::{BatchLocal, EdgeDeriver, TraceWalk};
pub use model::{hour_bucket, CallCounts};
pub use reader::KvDependencyReader;
pub use writer::CounterWriter;

/// Read side of dependency storage.
#[async_trait::async_trait]
pub trait DependencyReader: Send + Sync {
    /// Call counts per service pair for the hour buckets between
    /// `end_time - lookback` and `end_time`. No ordering guarantee.
    async fn get_dependencies(
        &self,
        end_time: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>>;
}
