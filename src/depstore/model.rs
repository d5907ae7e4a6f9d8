//! Dependency counter rows and client-side count merging.

use crate::core::{DependencyLink, Result};
use crate::store::schema::{CALL_COUNT, CALL_TIME_BUCKET, CHILD, DEPENDENCY_KEY, PARENT, SOURCE};
use crate::store::{required_n, required_s, AttributeValue, Item, UpdateRequest};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

const BUCKET_SECONDS: i64 = 3600;

/// Start of the hour containing `time`, in epoch seconds. Shared by the
/// write and read paths so both agree on bucket boundaries.
pub fn hour_bucket(time: DateTime<Utc>) -> i64 {
    time.timestamp().div_euclid(BUCKET_SECONDS) * BUCKET_SECONDS
}

/// Row key of a parent/child pair.
pub fn dependency_key(parent: &str, child: &str) -> String {
    format!("{}/{}", parent, child)
}

/// Call counts per `parent -> child` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    counts: BTreeMap<String, BTreeMap<String, u64>>,
}

impl CallCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` calls from `parent` to `child`.
    pub fn add(&mut self, parent: &str, child: &str, count: u64) {
        let total = self
            .counts
            .entry(parent.to_string())
            .or_default()
            .entry(child.to_string())
            .or_insert(0);
        *total = total.saturating_add(count);
    }

    pub fn get(&self, parent: &str, child: &str) -> u64 {
        self.counts
            .get(parent)
            .and_then(|children| children.get(child))
            .copied()
            .unwrap_or(0)
    }

    /// Iterates over `(parent, child, count)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, u64)> {
        self.counts.iter().flat_map(|(parent, children)| {
            children
                .iter()
                .map(move |(child, count)| (parent.as_str(), child.as_str(), *count))
        })
    }

    /// Number of distinct pairs.
    pub fn len(&self) -> usize {
        self.counts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn into_links(self) -> Vec<DependencyLink> {
        self.counts
            .into_iter()
            .flat_map(|(parent, children)| {
                children.into_iter().map(move |(child, call_count)| DependencyLink {
                    parent: parent.clone(),
                    child,
                    call_count,
                })
            })
            .collect()
    }
}

/// Additive update of one counter row.
pub fn increment_request(
    table: &str,
    parent: &str,
    child: &str,
    bucket: i64,
    count: u64,
    source: &str,
) -> UpdateRequest {
    let key = Item::from([
        (DEPENDENCY_KEY.to_string(), AttributeValue::s(dependency_key(parent, child))),
        (CALL_TIME_BUCKET.to_string(), AttributeValue::n(bucket)),
    ]);
    UpdateRequest::new(table, key)
        .add(CALL_COUNT, AttributeValue::n(count))
        .set(PARENT, AttributeValue::s(parent))
        .set(CHILD, AttributeValue::s(child))
        .set(SOURCE, AttributeValue::s(source))
}

/// Reads `(parent, child, count)` from a counter row.
pub fn item_to_link(item: &Item) -> Result<DependencyLink> {
    Ok(DependencyLink {
        parent: required_s(item, PARENT)?.to_string(),
        child: required_s(item, CHILD)?.to_string(),
        call_count: required_n(item, CALL_COUNT)?,
    })
}
