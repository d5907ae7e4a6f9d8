use super::model::{hour_bucket, increment_request, CallCounts};
use crate::core::{Result, TraceKvError};
use crate::store::StoreClient;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;

/// Persists call counts as additive increments of hour-bucket rows.
#[derive(Clone)]
pub struct CounterWriter {
    store: Arc<dyn StoreClient>,
    table: String,
}

impl CounterWriter {
    pub fn new<S: Into<String>>(store: Arc<dyn StoreClient>, table: S) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    /// Adds every pair of `counts` to the bucket containing `now`. Each pair
    /// is one independent update; the first failure is returned.
    pub async fn write(&self, counts: &CallCounts, source: &str, now: DateTime<Utc>) -> Result<()> {
        let bucket = hour_bucket(now);
        let updates = counts.iter().map(|(parent, child, count)| {
            let request = increment_request(&self.table, parent, child, bucket, count, source);
            async move {
                self.store.update_item(&request).await.map_err(|e| {
                    e.context(format!("failed to increment dependency {}/{}", parent, child))
                })
            }
        });
        try_join_all(updates)
            .await
            .map_err(|e| TraceKvError::fanout("dependency counter write", e))?;
        Ok(())
    }
}
