//! Configuration management for tracekv.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Programmatic overrides through [`ConfigBuilder`]
//! - Validation and defaults

use crate::core::{Result, TraceKvError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete configuration for the storage adapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Table names
    pub tables: TablesConfig,
    /// Store connection and provisioning
    pub store: StoreConfig,
    /// Search index sharding
    pub sharding: ShardingConfig,
    /// Span writer settings
    pub writer: WriterConfig,
    /// Span reader settings
    pub reader: ReaderConfig,
    /// Dependency aggregation
    pub dependencies: DependencyConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Names of the four logical tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    /// Span rows, partitioned by trace ID
    pub spans: String,
    /// Service registry
    pub services: String,
    /// Operation registry
    pub operations: String,
    /// Hour-bucketed dependency counters
    pub dependencies: String,
}

/// Store connection and provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Drop and recreate all tables on startup
    pub recreate_tables: bool,
    /// Create missing tables on startup
    pub ensure_tables: bool,
    /// How long provisioning waits for a table to become active
    #[serde(with = "humantime_serde")]
    pub table_ready_timeout: Duration,
    /// Maximum items evaluated per page by the in-process store
    pub page_size: usize,
}

/// Search index sharding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// Number of service-name buckets. Changing it requires re-indexing
    /// existing spans, since reads only fan out over the current buckets.
    pub shard_count: u32,
}

/// Span writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// How long written rows live before the store expires them
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Capacity of the service dedup cache
    pub service_cache_size: usize,
    /// Capacity of the operation dedup cache
    pub operation_cache_size: usize,
    /// Minimum time between two writes of the same service row
    #[serde(with = "humantime_serde")]
    pub service_dedupe_window: Duration,
    /// Minimum time between two writes of the same operation row
    #[serde(with = "humantime_serde")]
    pub operation_dedupe_window: Duration,
}

/// Span reader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Trace limit used when a search asks for zero traces
    pub default_num_traces: usize,
}

/// How dependency edges are derived from written spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyStrategy {
    /// Resolve references against spans of the same ingestion batch only
    BatchLocal,
    /// Resolve references against the full stored trace
    TraceWalk,
    /// Do not derive dependencies at write time
    Disabled,
}

/// Dependency aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyConfig {
    /// Edge derivation strategy
    pub strategy: DependencyStrategy,
    /// Spans buffered before a batch is derived and flushed
    pub batch_size: usize,
    /// Maximum time a span waits in the buffer
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Capacity of the channel feeding the aggregator
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Include targets, thread IDs and line numbers
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for TablesConfig {
    fn default() -> Self {
        TablesConfig {
            spans: "jaeger.spans".to_string(),
            services: "jaeger.services".to_string(),
            operations: "jaeger.operations".to_string(),
            dependencies: "jaeger.dependencies".to_string(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            recreate_tables: false,
            ensure_tables: true,
            table_ready_timeout: Duration::from_secs(300),
            page_size: 100,
        }
    }
}

impl Default for ShardingConfig {
    fn default() -> Self {
        ShardingConfig { shard_count: 32 }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            retention: Duration::from_secs(7 * 24 * 3600), // 7 days
            service_cache_size: 100,
            operation_cache_size: 300,
            service_dedupe_window: Duration::from_secs(300),
            operation_dedupe_window: Duration::from_secs(300),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        ReaderConfig {
            default_num_traces: 20,
        }
    }
}

impl Default for DependencyConfig {
    fn default() -> Self {
        DependencyConfig {
            strategy: DependencyStrategy::BatchLocal,
            batch_size: 500,
            flush_interval: Duration::from_secs(10),
            channel_capacity: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let tables = [
            ("spans", &self.tables.spans),
            ("services", &self.tables.services),
            ("operations", &self.tables.operations),
            ("dependencies", &self.tables.dependencies),
        ];
        for (i, (role, name)) in tables.iter().enumerate() {
            if name.is_empty() {
                return Err(TraceKvError::config(format!("{} table name cannot be empty", role)));
            }
            if let Some((other, _)) = tables[..i].iter().find(|(_, other)| other == name) {
                return Err(TraceKvError::config(format!(
                    "{} and {} tables must be different: both set to {}",
                    other, role, name
                )));
            }
        }

        if self.sharding.shard_count == 0 {
            return Err(TraceKvError::config("shard_count must be greater than 0"));
        }

        if self.store.page_size == 0 {
            return Err(TraceKvError::config("page_size must be greater than 0"));
        }

        if self.writer.retention.is_zero() {
            return Err(TraceKvError::config("retention must be greater than 0"));
        }

        if self.writer.service_cache_size == 0 || self.writer.operation_cache_size == 0 {
            return Err(TraceKvError::config("dedup cache sizes must be greater than 0"));
        }

        if self.reader.default_num_traces == 0 {
            return Err(TraceKvError::config("default_num_traces must be greater than 0"));
        }

        if self.dependencies.strategy != DependencyStrategy::Disabled {
            if self.dependencies.batch_size == 0 {
                return Err(TraceKvError::config("dependency batch_size must be greater than 0"));
            }
            if self.dependencies.channel_capacity == 0 {
                return Err(TraceKvError::config(
                    "dependency channel_capacity must be greater than 0",
                ));
            }
            if self.dependencies.flush_interval.is_zero() {
                return Err(TraceKvError::config(
                    "dependency flush_interval must be greater than 0",
                ));
            }
        }

        Ok(())
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| TraceKvError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Load configuration from a YAML file
    pub async fn from_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            TraceKvError::config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        tracing::info!("Loaded configuration from: {:?}", path);
        self.from_yaml(&content)
    }

    /// Set all four table names from a common prefix
    pub fn table_prefix(mut self, prefix: &str) -> Self {
        self.config.tables.spans = format!("{}.spans", prefix);
        self.config.tables.services = format!("{}.services", prefix);
        self.config.tables.operations = format!("{}.operations", prefix);
        self.config.tables.dependencies = format!("{}.dependencies", prefix);
        self
    }

    /// Set the number of search index buckets
    pub fn shard_count(mut self, shard_count: u32) -> Self {
        self.config.sharding.shard_count = shard_count;
        self
    }

    /// Set row retention
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.writer.retention = retention;
        self
    }

    /// Set both registry dedup windows
    pub fn dedupe_window(mut self, window: Duration) -> Self {
        self.config.writer.service_dedupe_window = window;
        self.config.writer.operation_dedupe_window = window;
        self
    }

    /// Set the dependency derivation strategy
    pub fn dependency_strategy(mut self, strategy: DependencyStrategy) -> Self {
        self.config.dependencies.strategy = strategy;
        self
    }

    /// Set the dependency batch size
    pub fn dependency_batch_size(mut self, batch_size: usize) -> Self {
        self.config.dependencies.batch_size = batch_size;
        self
    }

    /// Set the in-process store page size
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.store.page_size = page_size;
        self
    }

    /// Drop and recreate tables on startup
    pub fn recreate_tables(mut self, recreate: bool) -> Self {
        self.config.store.recreate_tables = recreate;
        self
    }

    /// Set the log level
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.logging.level = level;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sharding.shard_count, 32);
        assert_eq!(config.writer.retention, Duration::from_secs(604_800));
    }

    #[test]
    fn test_zero_shards_rejected() {
        let mut config = Config::default();
        config.sharding.shard_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_table_name_conflict() {
        let mut config = Config::default();
        config.tables.operations = config.tables.services.clone();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("services and operations"));
    }

    #[test]
    fn test_disabled_dependencies_skip_batch_validation() {
        let mut config = Config::default();
        config.dependencies.batch_size = 0;
        assert!(config.validate().is_err());

        config.dependencies.strategy = DependencyStrategy::Disabled;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .table_prefix("test")
            .shard_count(4)
            .dedupe_window(Duration::from_secs(60))
            .dependency_strategy(DependencyStrategy::TraceWalk)
            .build()
            .unwrap();

        assert_eq!(config.tables.spans, "test.spans");
        assert_eq!(config.tables.dependencies, "test.dependencies");
        assert_eq!(config.sharding.shard_count, 4);
        assert_eq!(config.writer.operation_dedupe_window, Duration::from_secs(60));
        assert_eq!(config.dependencies.strategy, DependencyStrategy::TraceWalk);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
tables:
  spans: traces.spans
sharding:
  shard_count: 8
writer:
  retention: 2days
  service_dedupe_window: 1m
dependencies:
  strategy: trace_walk
  flush_interval: 30s
logging:
  level: debug
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

        assert_eq!(config.tables.spans, "traces.spans");
        assert_eq!(config.tables.services, "jaeger.services");
        assert_eq!(config.sharding.shard_count, 8);
        assert_eq!(config.writer.retention, Duration::from_secs(2 * 24 * 3600));
        assert_eq!(config.writer.service_dedupe_window, Duration::from_secs(60));
        assert_eq!(config.writer.operation_dedupe_window, Duration::from_secs(300));
        assert_eq!(config.dependencies.strategy, DependencyStrategy::TraceWalk);
        assert_eq!(config.dependencies.flush_interval, Duration::from_secs(30));
        assert_eq!(config.logging.level, LogLevel::Debug);
    }
}
