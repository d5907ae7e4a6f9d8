//! Span store integration tests over the memory store.

mod common;

use common::{create_test_trace, last_hour, setup, TestSpanBuilder};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tracekv::core::config::DependencyStrategy;
use tracekv::core::{ConfigBuilder, ErrorKind, KeyValue, Log, OperationQuery, TraceId, TraceQuery};
use tracekv::store::{AttributeValue, MemoryStore, StoreClient};
use tracekv::{Backend, Config, SpanReader, SpanWriter};

fn no_dependencies() -> Config {
    ConfigBuilder::new()
        .dependency_strategy(DependencyStrategy::Disabled)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_span_round_trip() {
    let (_store, backend) = setup(no_dependencies()).await;
    let mut span = TestSpanBuilder::new(1, 1)
        .service("frontend")
        .operation("GET /checkout")
        .tag(KeyValue::string("http.method", "GET"))
        .tag(KeyValue::int64("http.status_code", 200))
        .tag(KeyValue::bool("error", false))
        .tag(KeyValue::float64("sample.rate", 0.5))
        .tag(KeyValue::binary("payload", vec![0xde, 0xad]))
        .build();
    span.logs.push(Log {
        timestamp: span.start_time,
        fields: vec![KeyValue::string("event", "cache miss")],
    });
    span.process.tags.push(KeyValue::string("hostname", "node-1"));
    span.warnings.push("clock skew adjusted".to_string());

    backend.span_writer().write_span(&span).await.unwrap();
    let trace = backend.span_reader().get_trace(TraceId::new(1)).await.unwrap();
    assert_eq!(trace.spans, vec![span]);
}

#[tokio::test]
async fn test_get_trace_not_found() {
    let (_store, backend) = setup(no_dependencies()).await;
    let err = backend.span_reader().get_trace(TraceId::new(42)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_registry_rows_are_deduplicated() {
    let (store, backend) = setup(no_dependencies()).await;
    let writer = backend.span_writer();
    for span_num in 1..=2 {
        let span = TestSpanBuilder::new(1, span_num)
            .service("frontend")
            .operation("GET /")
            .build();
        writer.write_span(&span).await.unwrap();
    }

    assert_eq!(store.operation_counts("jaeger.spans").puts, 2);
    assert_eq!(store.operation_counts("jaeger.services").puts, 1);
    assert_eq!(store.operation_counts("jaeger.operations").puts, 1);
}

#[tokio::test]
async fn test_failed_registry_write_is_retried() {
    let (store, backend) = setup(no_dependencies()).await;
    let writer = backend.span_writer();
    let span = TestSpanBuilder::new(1, 1).service("frontend").build();

    store.fail_table("jaeger.services", "throttled");
    let err = writer.write_span(&span).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFailure);

    store.clear_failures();
    writer.write_span(&span).await.unwrap();
    assert_eq!(store.operation_counts("jaeger.services").puts, 2);
    assert_eq!(backend.span_reader().get_services().await.unwrap(), vec!["frontend"]);
}

#[tokio::test]
async fn test_services_are_sorted() {
    let (_store, backend) = setup(no_dependencies()).await;
    create_test_trace(&backend, 1, "b", &["a"]).await;
    create_test_trace(&backend, 2, "a", &["b"]).await;

    let services = backend.span_reader().get_services().await.unwrap();
    assert_eq!(services, vec!["a", "b"]);
}

#[tokio::test]
async fn test_get_operations_by_span_kind() {
    let (_store, backend) = setup(no_dependencies()).await;
    let writer = backend.span_writer();
    let server = TestSpanBuilder::new(1, 1)
        .service("frontend")
        .operation("GET /")
        .tag(KeyValue::string("span.kind", "server"))
        .build();
    let client = TestSpanBuilder::new(1, 2)
        .service("frontend")
        .operation("SELECT")
        .tag(KeyValue::string("span.kind", "client"))
        .build();
    writer.write_span(&server).await.unwrap();
    writer.write_span(&client).await.unwrap();

    let reader = backend.span_reader();
    let mut all = reader.get_operations(&OperationQuery::new("frontend")).await.unwrap();
    all.sort_by(|a, b| a.name.cmp(&b.name));
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, "GET /");

    let servers = reader
        .get_operations(&OperationQuery::new("frontend").span_kind("server"))
        .await
        .unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].name, "GET /");
    assert_eq!(servers[0].span_kind, "server");
}

#[tokio::test]
async fn test_get_operations_requires_service() {
    let (store, backend) = setup(no_dependencies()).await;
    let err = backend
        .span_reader()
        .get_operations(&OperationQuery::new(""))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    assert_eq!(store.operation_counts("jaeger.operations").total(), 0);
}

#[tokio::test]
async fn test_find_traces_respects_limit() {
    let (_store, backend) = setup(no_dependencies()).await;
    for trace_num in 1..=3 {
        create_test_trace(&backend, trace_num, "frontend", &["api"]).await;
    }
    let (min, max) = last_hour();
    let reader = backend.span_reader();

    let one = reader
        .find_traces(&TraceQuery::new("frontend", min, max).num_traces(1))
        .await
        .unwrap();
    assert_eq!(one.len(), 1);

    let two = reader
        .find_traces(&TraceQuery::new("frontend", min, max).num_traces(2))
        .await
        .unwrap();
    assert_eq!(two.len(), 2);

    let all = reader.find_traces(&TraceQuery::new("frontend", min, max)).await.unwrap();
    assert_eq!(all.len(), 3);
    for trace in &all {
        assert_eq!(trace.spans.len(), 2);
    }
}

#[tokio::test]
async fn test_find_traces_filters() {
    let (_store, backend) = setup(no_dependencies()).await;
    let writer = backend.span_writer();
    let failing = TestSpanBuilder::new(1, 1)
        .service("frontend")
        .operation("POST /pay")
        .duration_ms(900)
        .tag(KeyValue::int64("http.status_code", 500))
        .build();
    let ok = TestSpanBuilder::new(2, 1)
        .service("frontend")
        .operation("POST /pay")
        .duration_ms(20)
        .tag(KeyValue::int64("http.status_code", 200))
        .build();
    writer.write_span(&failing).await.unwrap();
    writer.write_span(&ok).await.unwrap();

    let (min, max) = last_hour();
    let reader = backend.span_reader();

    let by_tag = reader
        .find_traces(&TraceQuery::new("frontend", min, max).tag("http.status_code", "500"))
        .await
        .unwrap();
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].trace_id(), Some(TraceId::new(1)));

    let slow = reader
        .find_traces(&TraceQuery::new("frontend", min, max).duration_min(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].trace_id(), Some(TraceId::new(1)));

    let other_operation = reader
        .find_traces(&TraceQuery::new("frontend", min, max).operation_name("GET /"))
        .await
        .unwrap();
    assert!(other_operation.is_empty());
}

#[tokio::test]
async fn test_find_traces_rejects_missing_service() {
    let (store, backend) = setup(no_dependencies()).await;
    let (min, max) = last_hour();
    let err = backend
        .span_reader()
        .find_traces(&TraceQuery::new("", min, max))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidQuery);
    assert_eq!(store.operation_counts("jaeger.spans").queries, 0);
}

#[tokio::test]
async fn test_failing_bucket_aborts_find_traces() {
    let (store, backend) = setup(no_dependencies()).await;
    create_test_trace(&backend, 1, "frontend", &[]).await;
    store.fail_partition("jaeger.spans", AttributeValue::s("frontend#0"), "internal server error");

    let (min, max) = last_hour();
    let err = backend
        .span_reader()
        .find_traces(&TraceQuery::new("frontend", min, max))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialFanoutFailure);
    assert_eq!(err.root().kind(), ErrorKind::StoreFailure);
}

#[tokio::test]
async fn test_find_trace_ids_is_empty() {
    let (_store, backend) = setup(no_dependencies()).await;
    create_test_trace(&backend, 1, "frontend", &[]).await;
    let (min, max) = last_hour();
    let ids = backend
        .span_reader()
        .find_trace_ids(&TraceQuery::new("frontend", min, max))
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn test_small_pages_are_followed() {
    let config = ConfigBuilder::new()
        .dependency_strategy(DependencyStrategy::Disabled)
        .page_size(1)
        .build()
        .unwrap();
    let store = Arc::new(MemoryStore::from_config(&config.store));
    let backend = Backend::start(config, Arc::clone(&store) as Arc<dyn StoreClient>)
        .await
        .unwrap();
    create_test_trace(&backend, 1, "frontend", &["a", "b", "c"]).await;

    let trace = backend.span_reader().get_trace(TraceId::new(1)).await.unwrap();
    assert_eq!(trace.spans.len(), 4);
    assert_eq!(store.operation_counts("jaeger.spans").queries, 4);
}

#[tokio::test]
async fn test_failing_trace_fetch_aborts_find_traces() {
    let (store, backend) = setup(no_dependencies()).await;
    create_test_trace(&backend, 1, "frontend", &[]).await;
    create_test_trace(&backend, 2, "frontend", &[]).await;
    store.fail_partition(
        "jaeger.spans",
        AttributeValue::s(TraceId::new(2).to_string()),
        "internal server error",
    );

    let (min, max) = last_hour();
    let err = backend
        .span_reader()
        .find_traces(&TraceQuery::new("frontend", min, max))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialFanoutFailure);
    assert_eq!(err.root().kind(), ErrorKind::StoreFailure);
}

#[tokio::test]
async fn test_bucket_paging_stops_at_limit() {
    let config = ConfigBuilder::new()
        .dependency_strategy(DependencyStrategy::Disabled)
        .shard_count(1)
        .page_size(1)
        .build()
        .unwrap();
    let store = Arc::new(MemoryStore::from_config(&config.store));
    let backend = Backend::start(config, Arc::clone(&store) as Arc<dyn StoreClient>)
        .await
        .unwrap();
    for trace_num in 1..=10 {
        create_test_trace(&backend, trace_num, "frontend", &[]).await;
    }
    let before = store.operation_counts("jaeger.spans").queries;

    let (min, max) = last_hour();
    let traces = backend
        .span_reader()
        .find_traces(&TraceQuery::new("frontend", min, max).num_traces(2))
        .await
        .unwrap();
    assert_eq!(traces.len(), 2);
    // Two single-item search pages, then one fetch per trace
    assert_eq!(store.operation_counts("jaeger.spans").queries - before, 4);
}

#[tokio::test]
async fn test_operations_with_slashes_are_registered_separately() {
    let (_store, backend) = setup(no_dependencies()).await;
    let writer = backend.span_writer();
    let first = TestSpanBuilder::new(1, 1).service("a/b").operation("c").build();
    let second = TestSpanBuilder::new(1, 2).service("a").operation("b/c").build();
    writer.write_span(&first).await.unwrap();
    writer.write_span(&second).await.unwrap();

    let operations = backend
        .span_reader()
        .get_operations(&OperationQuery::new("a"))
        .await
        .unwrap();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].name, "b/c");
}
