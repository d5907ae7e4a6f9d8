//! Dependency store integration tests over the memory store.

mod common;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::{create_test_trace, setup, TestSpanBuilder};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tracekv::core::config::DependencyStrategy;
use tracekv::core::{ConfigBuilder, DependencyLink, Span};
use tracekv::depstore::{BatchLocal, CallCounts, CounterWriter, EdgeDeriver};
use tracekv::store::StoreClient;
use tracekv::{DependencyReader, SpanWriter};

const DEPENDENCIES: &str = "jaeger.dependencies";

fn link(parent: &str, child: &str, call_count: u64) -> DependencyLink {
    DependencyLink {
        parent: parent.to_string(),
        child: child.to_string(),
        call_count,
    }
}

/// A query frontend fanning out to a sidecar, plus a span whose parent was
/// written in another batch.
fn thanos_batch() -> Vec<Span> {
    vec![
        TestSpanBuilder::new(0xabc, 1)
            .service("thanos-query")
            .operation("query_range")
            .build(),
        TestSpanBuilder::new(0xabc, 2)
            .service("thanos-sidecar")
            .operation("/thanos.Store/Series")
            .child_of(1)
            .build(),
        TestSpanBuilder::new(0xabc, 3)
            .service("prometheus")
            .operation("remote_read")
            .child_of(77)
            .build(),
    ]
}

#[tokio::test]
async fn test_counts_merge_across_buckets_in_window() {
    let (store, backend) = setup(
        ConfigBuilder::new()
            .dependency_strategy(DependencyStrategy::Disabled)
            .build()
            .unwrap(),
    )
    .await;
    let counters = CounterWriter::new(Arc::clone(&store) as Arc<dyn StoreClient>, DEPENDENCIES);
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    let mut five = CallCounts::new();
    five.add("frontend", "api", 5);
    let mut three = CallCounts::new();
    three.add("frontend", "api", 3);
    let mut old = CallCounts::new();
    old.add("frontend", "api", 100);

    counters.write(&five, "batch_local", now - ChronoDuration::minutes(30)).await.unwrap();
    counters.write(&three, "batch_local", now - ChronoDuration::minutes(90)).await.unwrap();
    counters.write(&old, "batch_local", now - ChronoDuration::days(30)).await.unwrap();
    assert_eq!(store.item_count(DEPENDENCIES), 3);

    let links = backend
        .dependency_reader()
        .get_dependencies(now, Duration::from_secs(2 * 3600))
        .await
        .unwrap();
    assert_eq!(links, vec![link("frontend", "api", 8)]);
}

#[tokio::test]
async fn test_empty_window_returns_no_links() {
    let (_store, backend) = setup(Default::default()).await;
    let links = backend
        .dependency_reader()
        .get_dependencies(Utc::now(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(links.is_empty());
}

#[tokio::test]
async fn test_batch_local_derives_fixture_edges() {
    let counts = BatchLocal.derive(&thanos_batch()).await.unwrap();
    assert_eq!(counts.into_links(), vec![link("thanos-query", "thanos-sidecar", 1)]);
}

#[tokio::test]
async fn test_written_spans_become_dependencies() {
    let (_store, backend) = setup(Default::default()).await;
    let writer = backend.span_writer();
    for span in &thanos_batch() {
        writer.write_span(span).await.unwrap();
    }
    create_test_trace(&backend, 2, "frontend", &["api", "api"]).await;
    backend.flush_dependencies().await.unwrap();

    let mut links = backend
        .dependency_reader()
        .get_dependencies(Utc::now(), Duration::from_secs(3600))
        .await
        .unwrap();
    links.sort();
    assert_eq!(
        links,
        vec![link("frontend", "api", 2), link("thanos-query", "thanos-sidecar", 1)]
    );
    backend.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_trace_walk_resolves_parents_from_earlier_batches() {
    let config = ConfigBuilder::new()
        .dependency_strategy(DependencyStrategy::TraceWalk)
        .build()
        .unwrap();
    let (_store, backend) = setup(config).await;
    let writer = backend.span_writer();

    let parent = TestSpanBuilder::new(5, 1).service("frontend").build();
    writer.write_span(&parent).await.unwrap();
    backend.flush_dependencies().await.unwrap();

    let child = TestSpanBuilder::new(5, 2).service("api").child_of(1).build();
    writer.write_span(&child).await.unwrap();
    backend.flush_dependencies().await.unwrap();

    let links = backend
        .dependency_reader()
        .get_dependencies(Utc::now(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(links, vec![link("frontend", "api", 1)]);
    backend.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_batch_local_misses_parents_from_earlier_batches() {
    let (_store, backend) = setup(Default::default()).await;
    let writer = backend.span_writer();

    writer
        .write_span(&TestSpanBuilder::new(5, 1).service("frontend").build())
        .await
        .unwrap();
    backend.flush_dependencies().await.unwrap();
    writer
        .write_span(&TestSpanBuilder::new(5, 2).service("api").child_of(1).build())
        .await
        .unwrap();
    backend.flush_dependencies().await.unwrap();

    let links = backend
        .dependency_reader()
        .get_dependencies(Utc::now(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(links.is_empty());
    backend.shutdown().await.unwrap();
}
