//! Span storage on the wide-column store.
//!
//! Spans live in one table partitioned by trace ID. A sparse secondary
//! index keyed by sharded service bucket and start time serves trace
//! searches. Services and operations are kept in two small registry tables
//! whose writes are deduplicated.

use crate::core::{Operation, OperationQuery, Result, Span, Trace, TraceId, TraceQuery};

pub mod dedupe;
pub mod model;
pub mod reader;
pub mod sharding;
pub mod trace_ids;
pub mod writer;

pub use dedupe::DedupCache;
pub use reader::KvSpanReader;
pub use sharding::ShardRouter;
pub use trace_ids::TraceIdSet;
pub use writer::KvSpanWriter;

/// Read side of span storage.
#[async_trait::async_trait]
pub trait SpanReader: Send + Sync {
    /// All stored spans of a trace. Fails with a not-found error when the
    /// trace has no spans.
    async fn get_trace(&self, trace_id: TraceId) -> Result<Trace>;

    /// Registered service names, sorted.
    async fn get_services(&self) -> Result<Vec<String>>;

    /// Registered operations of one service.
    async fn get_operations(&self, query: &OperationQuery) -> Result<Vec<Operation>>;

    /// Traces with at least one span matching the query.
    async fn find_traces(&self, query: &TraceQuery) -> Result<Vec<Trace>>;

    /// Not served by this store; always empty.
    async fn find_trace_ids(&self, query: &TraceQuery) -> Result<Vec<TraceId>>;
}

/// Write side of span storage.
#[async_trait::async_trait]
pub trait SpanWriter: Send + Sync {
    async fn write_span(&self, span: &Span) -> Result<()>;
}
