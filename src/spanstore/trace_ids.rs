//! Bounded set of trace IDs shared by the branches of one search.

use crate::core::TraceId;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Distinct trace IDs, capped at a limit. The capacity check and the
/// insert happen under one lock, so concurrent branches never overshoot.
#[derive(Debug)]
pub struct TraceIdSet {
    ids: Mutex<HashSet<TraceId>>,
    limit: usize,
}

impl TraceIdSet {
    pub fn new(limit: usize) -> Self {
        Self {
            ids: Mutex::new(HashSet::with_capacity(limit.min(1024))),
            limit,
        }
    }

    /// Inserts `id` unless the set is full. Returns true if it was added.
    pub fn insert(&self, id: TraceId) -> bool {
        let mut ids = self.ids.lock();
        if ids.len() >= self.limit {
            return false;
        }
        ids.insert(id)
    }

    pub fn is_full(&self) -> bool {
        self.ids.lock().len() >= self.limit
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    pub fn into_ids(self) -> Vec<TraceId> {
        self.ids.into_inner().into_iter().collect()
    }
}
