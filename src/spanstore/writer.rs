//! Span write engine.
//!
//! One span becomes up to three concurrent row writes: the span row (always),
//! the service row and the operation row. The registry writes go through
//! [`DedupCache`]s so a busy service does not rewrite the same two rows
//! with every span.

use super::dedupe::DedupCache;
use super::model;
use super::sharding::ShardRouter;
use super::SpanWriter;
use crate::core::config::{TablesConfig, WriterConfig};
use crate::core::{Result, Span};
use crate::depstore::DependencyAggregator;
use crate::store::{Item, PutRequest, StoreClient};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// [`SpanWriter`] over the span, service and operation tables.
pub struct KvSpanWriter {
    store: Arc<dyn StoreClient>,
    spans_table: String,
    services_table: String,
    operations_table: String,
    router: ShardRouter,
    retention: Duration,
    services: DedupCache<String>,
    operations: DedupCache<(String, String)>,
    dependencies: Option<DependencyAggregator>,
}

impl KvSpanWriter {
    pub fn new(
        store: Arc<dyn StoreClient>,
        tables: &TablesConfig,
        router: ShardRouter,
        config: &WriterConfig,
    ) -> Self {
        Self {
            store,
            spans_table: tables.spans.clone(),
            services_table: tables.services.clone(),
            operations_table: tables.operations.clone(),
            router,
            retention: config.retention,
            services: DedupCache::new("service", config.service_cache_size, config.service_dedupe_window),
            operations: DedupCache::new(
                "operation",
                config.operation_cache_size,
                config.operation_dedupe_window,
            ),
            dependencies: None,
        }
    }

    /// Forwards every written span to the dependency aggregator.
    pub fn with_dependency_aggregator(mut self, aggregator: DependencyAggregator) -> Self {
        self.dependencies = Some(aggregator);
        self
    }

    async fn put(&self, table: &str, item: Item) -> Result<()> {
        self.store
            .put_item(&PutRequest::new(table, item))
            .await
            .map_err(|e| e.context(format!("failed to put item into {}", table)))
    }

    async fn write_span_row(&self, span: &Span, expires_at: i64) -> Result<()> {
        let bucket = self.router.write_bucket(span.service_name(), span.span_id);
        let item = model::span_to_item(span, &bucket, expires_at)?;
        self.put(&self.spans_table, item)
            .await
            .map_err(|e| e.context("failed to write span item"))
    }

    async fn write_service_row(&self, span: &Span, expires_at: i64) -> Result<()> {
        let service = span.service_name();
        if service.is_empty() {
            return Ok(());
        }
        self.services
            .run(service.to_string(), || self.put(&self.services_table, model::service_item(service, expires_at)))
            .await
            .map(|_| ())
            .map_err(|e| e.context("failed to write service item"))
    }

    async fn write_operation_row(&self, span: &Span, expires_at: i64) -> Result<()> {
        if span.operation_name.is_empty() || span.service_name().is_empty() {
            return Ok(());
        }
        let key = (span.service_name().to_string(), span.operation_name.clone());
        self.operations
            .run(key, || self.put(&self.operations_table, model::operation_item(span, expires_at)))
            .await
            .map(|_| ())
            .map_err(|e| e.context("failed to write operation item"))
    }
}

#[async_trait::async_trait]
impl SpanWriter for KvSpanWriter {
    async fn write_span(&self, span: &Span) -> Result<()> {
        tracing::trace!("WriteSpan {}/{}", span.trace_id, span.span_id);
        let expires_at = model::expires_at(Utc::now(), self.retention);

        tokio::try_join!(
            self.write_span_row(span, expires_at),
            self.write_service_row(span, expires_at),
            self.write_operation_row(span, expires_at),
        )?;

        if let Some(aggregator) = &self.dependencies {
            aggregator.record(span).await?;
        }
        Ok(())
    }
}
