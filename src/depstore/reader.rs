use super::model::{hour_bucket, item_to_link, CallCounts};
use super::DependencyReader;
use crate::core::{DependencyLink, Result, TraceKvError};
use crate::store::schema::{CALL_COUNT, CALL_TIME_BUCKET, CHILD, PARENT};
use crate::store::{scan_all, AttributeValue, Condition, ScanRequest, StoreClient};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// [`DependencyReader`] over the hour-bucketed counter table.
pub struct KvDependencyReader {
    store: Arc<dyn StoreClient>,
    table: String,
}

impl KvDependencyReader {
    pub fn new<S: Into<String>>(store: Arc<dyn StoreClient>, table: S) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }
}

#[async_trait::async_trait]
impl DependencyReader for KvDependencyReader {
    async fn get_dependencies(
        &self,
        end_time: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Vec<DependencyLink>> {
        tracing::debug!("GetDependencies end={} lookback={:?}", end_time, lookback);
        let lookback = chrono::Duration::from_std(lookback)
            .map_err(|e| TraceKvError::invalid_query(format!("lookback out of range: {}", e)))?;
        let start_time = end_time
            .checked_sub_signed(lookback)
            .ok_or_else(|| TraceKvError::invalid_query("lookback reaches before the supported time range"))?;

        let filter = Condition::between(
            CALL_TIME_BUCKET,
            AttributeValue::n(hour_bucket(start_time)),
            AttributeValue::n(hour_bucket(end_time)),
        );
        let request = ScanRequest::new(self.table.as_str())
            .filter(Some(filter))
            .projection(&[PARENT, CHILD, CALL_COUNT]);
        let items = scan_all(self.store.as_ref(), request).await?;

        let mut counts = CallCounts::new();
        for item in &items {
            let link = item_to_link(item)?;
            counts.add(&link.parent, &link.child, link.call_count);
        }
        Ok(counts.into_links())
    }
}
