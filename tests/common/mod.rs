//! Common test utilities and fixtures.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracekv::core::{KeyValue, Span, SpanId, TraceId};
use tracekv::store::{MemoryStore, StoreClient};
use tracekv::{Backend, Config, SpanWriter};

/// Test fixture builder for creating spans with sensible defaults.
pub struct TestSpanBuilder {
    trace_num: u128,
    span_num: u64,
    parent_num: Option<u64>,
    service: String,
    operation: String,
    duration_ms: u64,
    start_time: Option<DateTime<Utc>>,
    tags: Vec<KeyValue>,
}

impl TestSpanBuilder {
    pub fn new(trace_num: u128, span_num: u64) -> Self {
        Self {
            trace_num,
            span_num,
            parent_num: None,
            service: "test-service".to_string(),
            operation: format!("operation-{}", span_num),
            duration_ms: 100,
            start_time: None,
            tags: Vec::new(),
        }
    }

    pub fn service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.operation = operation.to_string();
        self
    }

    pub fn child_of(mut self, parent_num: u64) -> Self {
        self.parent_num = Some(parent_num);
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn tag(mut self, tag: KeyValue) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn build(self) -> Span {
        let start_time = self
            .start_time
            .unwrap_or_else(|| Utc::now() - ChronoDuration::seconds(self.trace_num as i64 * 10));
        let mut builder = Span::builder()
            .trace_id(TraceId::new(self.trace_num))
            .span_id(SpanId::new(self.span_num))
            .service_name(self.service)
            .operation_name(self.operation)
            .start_time(start_time)
            .duration(Duration::from_millis(self.duration_ms));
        if let Some(parent) = self.parent_num {
            builder = builder.child_of(SpanId::new(parent));
        }
        for tag in self.tags {
            builder = builder.tag(tag);
        }
        builder.build().unwrap()
    }
}

/// Memory store and a provisioned backend over it.
pub async fn setup(config: Config) -> (Arc<MemoryStore>, Backend) {
    let store = Arc::new(MemoryStore::new());
    let backend = Backend::start(config, Arc::clone(&store) as Arc<dyn StoreClient>)
        .await
        .unwrap();
    (store, backend)
}

/// Writes a root span in `root_service` with one child per entry of
/// `children`, all in one trace.
pub async fn create_test_trace(backend: &Backend, trace_num: u128, root_service: &str, children: &[&str]) {
    let writer = backend.span_writer();
    let root = TestSpanBuilder::new(trace_num, 1).service(root_service).build();
    writer.write_span(&root).await.unwrap();
    for (i, service) in children.iter().enumerate() {
        let child = TestSpanBuilder::new(trace_num, i as u64 + 2)
            .service(service)
            .child_of(1)
            .build();
        writer.write_span(&child).await.unwrap();
    }
}

/// Search window covering every fixture span written in the last hour.
pub fn last_hour() -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    (now - ChronoDuration::hours(1), now + ChronoDuration::minutes(1))
}
