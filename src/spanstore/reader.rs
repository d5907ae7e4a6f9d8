//! Span read engine.

use super::model;
use super::sharding::ShardRouter;
use super::trace_ids::TraceIdSet;
use super::SpanReader;
use crate::core::config::{ReaderConfig, TablesConfig};
use crate::core::{Operation, OperationQuery, Result, Trace, TraceId, TraceKvError, TraceQuery};
use crate::store::schema::{
    DURATION, NAME, OPERATION_NAME, SEARCHABLE_TAGS, SERVICE_NAME, SERVICE_NAME_BUCKET, SPAN_KIND,
    SPAN_SEARCH_INDEX, START_TIME, TRACE_ID,
};
use crate::store::{
    query_all, query_pages, scan_all, AttributeValue, Condition, KeyCondition, QueryRequest,
    ScanRequest, StoreClient,
};
use futures::future::try_join_all;
use futures::TryStreamExt;
use std::pin::pin;
use std::sync::Arc;

/// [`SpanReader`] over the span, service and operation tables.
pub struct KvSpanReader {
    store: Arc<dyn StoreClient>,
    spans_table: String,
    services_table: String,
    operations_table: String,
    router: ShardRouter,
    default_num_traces: usize,
}

impl KvSpanReader {
    pub fn new(
        store: Arc<dyn StoreClient>,
        tables: &TablesConfig,
        router: ShardRouter,
        config: &ReaderConfig,
    ) -> Self {
        Self {
            store,
            spans_table: tables.spans.clone(),
            services_table: tables.services.clone(),
            operations_table: tables.operations.clone(),
            router,
            default_num_traces: config.default_num_traces,
        }
    }

    /// Collects matching trace IDs from one bucket until the shared set is
    /// full or the bucket is exhausted.
    async fn search_bucket(
        &self,
        bucket: String,
        query: &TraceQuery,
        filter: Option<Condition>,
        found: &TraceIdSet,
    ) -> Result<()> {
        if found.is_full() {
            return Ok(());
        }
        let min = model::to_nanos(query.start_time_min)?;
        let max = model::to_nanos(query.start_time_max)?;
        let request = QueryRequest::new(
            self.spans_table.as_str(),
            KeyCondition::partition(SERVICE_NAME_BUCKET, AttributeValue::s(bucket.as_str()))
                .sort(Condition::between(START_TIME, AttributeValue::n(min), AttributeValue::n(max))),
        )
        .index(SPAN_SEARCH_INDEX)
        .filter(filter)
        .projection(&[TRACE_ID])
        .descending();

        let mut pages = pin!(query_pages(self.store.as_ref(), request));
        while !found.is_full() {
            let Some(items) = pages.try_next().await? else {
                break;
            };
            for item in &items {
                found.insert(model::item_trace_id(item)?);
                if found.is_full() {
                    break;
                }
            }
        }
        tracing::trace!("Search of bucket {} done, {} trace IDs collected", bucket, found.len());
        Ok(())
    }
}

/// Post-index filter for a trace search: operation, duration bounds and
/// one equality per tag, all ANDed.
fn search_filter(query: &TraceQuery) -> Result<Option<Condition>> {
    let mut conditions = Vec::new();
    if let Some(operation) = query.operation_name.as_deref().filter(|op| !op.is_empty()) {
        conditions.push(Condition::eq(OPERATION_NAME, AttributeValue::s(operation)));
    }
    if let Some(min) = query.duration_min.filter(|d| !d.is_zero()) {
        conditions.push(Condition::ge(DURATION, AttributeValue::n(model::duration_nanos(min)?)));
    }
    if let Some(max) = query.duration_max.filter(|d| !d.is_zero()) {
        conditions.push(Condition::le(DURATION, AttributeValue::n(model::duration_nanos(max)?)));
    }
    for (key, value) in &query.tags {
        conditions.push(Condition::nested_eq(
            &[SEARCHABLE_TAGS, key.as_str()],
            AttributeValue::s(value.as_str()),
        ));
    }
    Ok(Condition::all(conditions))
}

fn validate_trace_query(query: &TraceQuery) -> Result<()> {
    if query.service_name.is_empty() {
        return Err(TraceKvError::invalid_query("service name is required"));
    }
    if query.start_time_min > query.start_time_max {
        return Err(TraceKvError::invalid_query(format!(
            "start time window is inverted: {} > {}",
            query.start_time_min, query.start_time_max
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl SpanReader for KvSpanReader {
    async fn get_trace(&self, trace_id: TraceId) -> Result<Trace> {
        tracing::trace!("GetTrace {}", trace_id);
        let request = QueryRequest::new(
            self.spans_table.as_str(),
            KeyCondition::partition(TRACE_ID, AttributeValue::s(trace_id.to_string())),
        );
        let items = query_all(self.store.as_ref(), request).await?;
        if items.is_empty() {
            return Err(TraceKvError::TraceNotFound(trace_id.to_string()));
        }
        let spans = items
            .iter()
            .map(model::item_to_span)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.context(format!("failed to convert spans of trace {}", trace_id)))?;
        Ok(Trace::new(spans))
    }

    async fn get_services(&self) -> Result<Vec<String>> {
        tracing::trace!("GetServices");
        let request = ScanRequest::new(self.services_table.as_str()).projection(&[NAME]);
        let items = scan_all(self.store.as_ref(), request).await?;
        let mut services = items
            .iter()
            .map(model::item_to_service)
            .collect::<Result<Vec<_>>>()?;
        services.sort();
        Ok(services)
    }

    async fn get_operations(&self, query: &OperationQuery) -> Result<Vec<Operation>> {
        tracing::trace!("GetOperations {:?}", query);
        if query.service_name.is_empty() {
            return Err(TraceKvError::invalid_query("service name is required"));
        }
        let filter = query
            .span_kind
            .as_deref()
            .filter(|kind| !kind.is_empty())
            .map(|kind| Condition::eq(SPAN_KIND, AttributeValue::s(kind)));
        let request = QueryRequest::new(
            self.operations_table.as_str(),
            KeyCondition::partition(SERVICE_NAME, AttributeValue::s(query.service_name.as_str())),
        )
        .filter(filter);
        let items = query_all(self.store.as_ref(), request).await?;
        items.iter().map(model::item_to_operation).collect()
    }

    async fn find_traces(&self, query: &TraceQuery) -> Result<Vec<Trace>> {
        tracing::trace!("FindTraces {:?}", query);
        validate_trace_query(query)?;
        let limit = match query.num_traces {
            0 => self.default_num_traces,
            n => n,
        };
        let filter = search_filter(query)?;

        let found = TraceIdSet::new(limit);
        let searches = self
            .router
            .bucket_keys(&query.service_name)
            .map(|bucket| self.search_bucket(bucket, query, filter.clone(), &found));
        try_join_all(searches)
            .await
            .map_err(|e| TraceKvError::fanout("span search index query", e))?;

        let trace_ids = found.into_ids();
        tracing::debug!(
            "FindTraces for {} matched {} traces",
            query.service_name,
            trace_ids.len()
        );
        let fetches = trace_ids.into_iter().map(|trace_id| async move {
            self.get_trace(trace_id)
                .await
                .map_err(|e| e.context(format!("failed to fetch trace {}", trace_id)))
        });
        try_join_all(fetches)
            .await
            .map_err(|e| TraceKvError::fanout("trace fetch", e))
    }

    async fn find_trace_ids(&self, query: &TraceQuery) -> Result<Vec<TraceId>> {
        tracing::trace!("FindTraceIDs {:?}", query);
        Ok(Vec::new())
    }
}
