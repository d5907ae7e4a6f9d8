//! Deriving service-to-service call edges from batches of spans.

use super::model::CallCounts;
use crate::core::{Result, Span, SpanId, TraceId, TraceKvError};
use crate::spanstore::SpanReader;
use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Turns a batch of written spans into call counts.
#[async_trait::async_trait]
pub trait EdgeDeriver: Send + Sync {
    /// Recorded on every counter row this deriver increments.
    fn name(&self) -> &'static str;

    async fn derive(&self, batch: &[Span]) -> Result<CallCounts>;
}

type SpanKey = (TraceId, SpanId);

/// Counts one call per reference of a batch span into `owners`.
/// Returns the number of references that could not be resolved.
fn count_references(batch: &[Span], owners: &HashMap<SpanKey, &str>, counts: &mut CallCounts) -> usize {
    let mut unresolved = 0;
    for span in batch {
        for reference in &span.references {
            match owners.get(&(reference.trace_id, reference.span_id)) {
                Some(parent) => counts.add(parent, span.service_name(), 1),
                None => unresolved += 1,
            }
        }
    }
    unresolved
}

fn owners<'a, I>(spans: I) -> HashMap<SpanKey, &'a str>
where
    I: IntoIterator<Item = &'a Span>,
{
    spans
        .into_iter()
        .map(|span| ((span.trace_id, span.span_id), span.service_name()))
        .collect()
}

/// Resolves references only against spans of the same batch. A call whose
/// parent arrived in an earlier batch is not counted.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchLocal;

#[async_trait::async_trait]
impl EdgeDeriver for BatchLocal {
    fn name(&self) -> &'static str {
        "batch_local"
    }

    async fn derive(&self, batch: &[Span]) -> Result<CallCounts> {
        let mut counts = CallCounts::new();
        let unresolved = count_references(batch, &owners(batch), &mut counts);
        tracing::debug!(
            "Derived {} dependency pairs from {} spans, {} references outside the batch",
            counts.len(),
            batch.len(),
            unresolved
        );
        Ok(counts)
    }
}

/// Resolves references against the full stored trace of every batch span.
/// Only the batch's own spans are counted, so a trace arriving over several
/// batches is not counted twice.
pub struct TraceWalk {
    reader: Arc<dyn SpanReader>,
}

impl TraceWalk {
    pub fn new(reader: Arc<dyn SpanReader>) -> Self {
        Self { reader }
    }
}

#[async_trait::async_trait]
impl EdgeDeriver for TraceWalk {
    fn name(&self) -> &'static str {
        "trace_walk"
    }

    async fn derive(&self, batch: &[Span]) -> Result<CallCounts> {
        let trace_ids: HashSet<TraceId> = batch.iter().map(|span| span.trace_id).collect();
        let fetches = trace_ids.into_iter().map(|trace_id| async move {
            match self.reader.get_trace(trace_id).await {
                Ok(trace) => Ok(trace.spans),
                Err(e) if e.is_not_found() => {
                    tracing::warn!("Trace {} not found while deriving dependencies", trace_id);
                    Ok(Vec::new())
                }
                Err(e) => Err(e.context(format!("failed to load trace {}", trace_id))),
            }
        });
        let traces = try_join_all(fetches)
            .await
            .map_err(|e| TraceKvError::fanout("dependency trace walk", e))?;

        let owners = owners(traces.iter().flatten().chain(batch));
        let mut counts = CallCounts::new();
        let unresolved = count_references(batch, &owners, &mut counts);
        if unresolved > 0 {
            tracing::debug!("{} references did not resolve within their traces", unresolved);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace: u128, id: u64, parent: Option<u64>, service: &str) -> Span {
        let mut builder = Span::builder()
            .trace_id(TraceId::new(trace))
            .span_id(SpanId::new(id))
            .service_name(service)
            .operation_name("op");
        if let Some(parent) = parent {
            builder = builder.child_of(SpanId::new(parent));
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_batch_local_resolves_within_batch() {
        let batch = vec![
            span(1, 1, None, "thanos-query"),
            span(1, 2, Some(1), "thanos-sidecar"),
            // Parent not in this batch
            span(1, 3, Some(99), "prometheus"),
        ];
        let counts = BatchLocal.derive(&batch).await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get("thanos-query", "thanos-sidecar"), 1);
    }

    #[tokio::test]
    async fn test_batch_local_counts_same_service_calls() {
        let batch = vec![span(1, 1, None, "api"), span(1, 2, Some(1), "api")];
        let counts = BatchLocal.derive(&batch).await.unwrap();
        assert_eq!(counts.get("api", "api"), 1);
    }

    #[tokio::test]
    async fn test_references_do_not_cross_traces() {
        let batch = vec![span(1, 1, None, "a"), span(2, 2, Some(1), "b")];
        let counts = BatchLocal.derive(&batch).await.unwrap();
        assert!(counts.is_empty());
    }
}
