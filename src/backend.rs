//! Wiring of the span and dependency stores over one shared store client.

use crate::core::config::DependencyStrategy;
use crate::core::{Config, Result};
use crate::depstore::{
    BatchLocal, CounterWriter, DependencyAggregator, DependencyReader, EdgeDeriver,
    KvDependencyReader, TraceWalk,
};
use crate::spanstore::{KvSpanReader, KvSpanWriter, ShardRouter, SpanReader, SpanWriter};
use crate::store::{provision, StoreClient};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Every host-facing handle, built from one [`Config`].
pub struct Backend {
    /// Shared store client
    store: Arc<dyn StoreClient>,
    span_reader: Arc<KvSpanReader>,
    span_writer: Arc<KvSpanWriter>,
    dependency_reader: Arc<KvDependencyReader>,
    /// Running aggregation task, absent when dependencies are disabled
    aggregator: Option<(DependencyAggregator, JoinHandle<()>)>,
    config: Config,
}

impl Backend {
    /// Provisions the tables, then builds the backend.
    pub async fn start(config: Config, store: Arc<dyn StoreClient>) -> Result<Self> {
        config.validate()?;
        provision::provision(store.as_ref(), &config.tables, &config.store).await?;
        Self::new(config, store)
    }

    /// Builds the backend over existing tables. Spawns the dependency
    /// aggregator on the current runtime unless the strategy is disabled.
    pub fn new(config: Config, store: Arc<dyn StoreClient>) -> Result<Self> {
        config.validate()?;
        let router = ShardRouter::new(config.sharding.shard_count);

        let span_reader = Arc::new(KvSpanReader::new(
            Arc::clone(&store),
            &config.tables,
            router,
            &config.reader,
        ));

        let deriver: Option<Arc<dyn EdgeDeriver>> = match config.dependencies.strategy {
            DependencyStrategy::BatchLocal => Some(Arc::new(BatchLocal)),
            DependencyStrategy::TraceWalk => Some(Arc::new(TraceWalk::new(
                Arc::clone(&span_reader) as Arc<dyn SpanReader>
            ))),
            DependencyStrategy::Disabled => None,
        };
        let aggregator = deriver.map(|deriver| {
            tracing::info!("Starting dependency aggregator with {} strategy", deriver.name());
            let counters = CounterWriter::new(Arc::clone(&store), config.tables.dependencies.as_str());
            DependencyAggregator::spawn(deriver, counters, &config.dependencies)
        });

        let mut span_writer = KvSpanWriter::new(Arc::clone(&store), &config.tables, router, &config.writer);
        if let Some((handle, _)) = &aggregator {
            span_writer = span_writer.with_dependency_aggregator(handle.clone());
        }

        let dependency_reader = Arc::new(KvDependencyReader::new(
            Arc::clone(&store),
            config.tables.dependencies.as_str(),
        ));

        Ok(Self {
            store,
            span_reader,
            span_writer: Arc::new(span_writer),
            dependency_reader,
            aggregator,
            config,
        })
    }

    pub fn span_reader(&self) -> Arc<dyn SpanReader> {
        Arc::clone(&self.span_reader) as Arc<dyn SpanReader>
    }

    pub fn span_writer(&self) -> Arc<dyn SpanWriter> {
        Arc::clone(&self.span_writer) as Arc<dyn SpanWriter>
    }

    /// Archive reads go to the same tables as regular reads.
    pub fn archive_span_reader(&self) -> Arc<dyn SpanReader> {
        self.span_reader()
    }

    /// Archive writes go to the same tables as regular writes.
    pub fn archive_span_writer(&self) -> Arc<dyn SpanWriter> {
        self.span_writer()
    }

    pub fn dependency_reader(&self) -> Arc<dyn DependencyReader> {
        Arc::clone(&self.dependency_reader) as Arc<dyn DependencyReader>
    }

    pub fn store(&self) -> &Arc<dyn StoreClient> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Writes out every span queued for dependency derivation.
    pub async fn flush_dependencies(&self) -> Result<()> {
        match &self.aggregator {
            Some((aggregator, _)) => aggregator.flush().await,
            None => Ok(()),
        }
    }

    /// Flushes pending dependencies and waits for the aggregator to stop.
    pub async fn shutdown(self) -> Result<()> {
        if let Some((aggregator, handle)) = self.aggregator {
            tracing::info!("Shutting down dependency aggregator");
            let flushed = aggregator.shutdown().await;
            handle.await?;
            flushed?;
        }
        Ok(())
    }
}
