//! Configuration system tests.

use std::io::Write;
use std::time::Duration;
use tracekv::core::config::{DependencyStrategy, LogLevel};
use tracekv::core::{Config, ConfigBuilder};

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.tables.spans, "jaeger.spans");
    assert_eq!(config.tables.dependencies, "jaeger.dependencies");
    assert_eq!(config.sharding.shard_count, 32);
    assert_eq!(config.writer.service_cache_size, 100);
    assert_eq!(config.writer.operation_cache_size, 300);
    assert_eq!(config.reader.default_num_traces, 20);
    assert_eq!(config.dependencies.strategy, DependencyStrategy::BatchLocal);
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .table_prefix("staging")
        .shard_count(8)
        .retention(Duration::from_secs(24 * 3600))
        .dedupe_window(Duration::from_secs(60))
        .dependency_strategy(DependencyStrategy::TraceWalk)
        .dependency_batch_size(50)
        .log_level(LogLevel::Debug)
        .build()
        .unwrap();

    assert_eq!(config.tables.spans, "staging.spans");
    assert_eq!(config.tables.operations, "staging.operations");
    assert_eq!(config.sharding.shard_count, 8);
    assert_eq!(config.writer.retention, Duration::from_secs(24 * 3600));
    assert_eq!(config.writer.operation_dedupe_window, Duration::from_secs(60));
    assert_eq!(config.dependencies.strategy, DependencyStrategy::TraceWalk);
    assert_eq!(config.dependencies.batch_size, 50);
    assert_eq!(config.logging.level, LogLevel::Debug);
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
tables:
  spans: traces.spans
store:
  recreate_tables: true
  table_ready_timeout: 2m
sharding:
  shard_count: 4
writer:
  retention: 3d
  service_dedupe_window: 30s
dependencies:
  strategy: trace_walk
  flush_interval: 500ms
logging:
  level: warn
"#;

    let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

    assert_eq!(config.tables.spans, "traces.spans");
    // Unset fields keep their defaults
    assert_eq!(config.tables.services, "jaeger.services");
    assert!(config.store.recreate_tables);
    assert_eq!(config.store.table_ready_timeout, Duration::from_secs(120));
    assert_eq!(config.sharding.shard_count, 4);
    assert_eq!(config.writer.retention, Duration::from_secs(3 * 24 * 3600));
    assert_eq!(config.writer.service_dedupe_window, Duration::from_secs(30));
    assert_eq!(config.writer.operation_dedupe_window, Duration::from_secs(300));
    assert_eq!(config.dependencies.strategy, DependencyStrategy::TraceWalk);
    assert_eq!(config.dependencies.flush_interval, Duration::from_millis(500));
    assert_eq!(config.logging.level, LogLevel::Warn);
}

#[test]
fn test_config_validation() {
    assert!(Config::default().validate().is_ok());

    assert!(ConfigBuilder::new().shard_count(0).build().is_err());
    assert!(ConfigBuilder::new().page_size(0).build().is_err());
    assert!(ConfigBuilder::new().retention(Duration::ZERO).build().is_err());

    // Batch size only matters while dependencies are derived
    assert!(ConfigBuilder::new().dependency_batch_size(0).build().is_err());
    assert!(ConfigBuilder::new()
        .dependency_strategy(DependencyStrategy::Disabled)
        .dependency_batch_size(0)
        .build()
        .is_ok());

    let mut shared = Config::default();
    shared.tables.operations = shared.tables.services.clone();
    let err = shared.validate().unwrap_err();
    assert!(err.to_string().contains("must be different"));
}

#[test]
fn test_error_handling() {
    let result = ConfigBuilder::new().from_yaml("invalid: yaml: content: [");
    assert!(result.is_err());

    let result = ConfigBuilder::new().from_yaml(
        r#"
sharding:
  shard_count: "not_a_number"
"#,
    );
    assert!(result.is_err());

    let result = ConfigBuilder::new().from_yaml(
        r#"
dependencies:
  strategy: nightly_job
"#,
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "sharding:\n  shard_count: 16\nreader:\n  default_num_traces: 50").unwrap();

    let config = ConfigBuilder::new()
        .from_file(file.path())
        .await
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(config.sharding.shard_count, 16);
    assert_eq!(config.reader.default_num_traces, 50);
}

#[tokio::test]
async fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = ConfigBuilder::new().from_file(dir.path().join("absent.yaml")).await;
    assert!(result.is_err());
}
