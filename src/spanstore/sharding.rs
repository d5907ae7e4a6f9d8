//! Service-name bucket sharding for the span search index.
//!
//! All spans of one service would otherwise share a single index partition.
//! Each span is indexed under one of `shard_count` buckets chosen by its
//! span ID; searches fan out over every bucket of the service.

use crate::core::SpanId;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Partition key of bucket `bucket` of `service`. The bucket index is the
/// decimal suffix after the last `#`, so distinct pairs never collide.
pub fn bucket_key(service: &str, bucket: u32) -> String {
    format!("{}#{}", service, bucket)
}

/// Maps spans to buckets and services to their bucket set.
#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    shard_count: u32,
}

impl ShardRouter {
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Bucket index of a span. Uses a seedless hash so the choice is the
    /// same across processes and restarts.
    pub fn bucket_for(&self, span_id: SpanId) -> u32 {
        let mut hasher = FxHasher::default();
        span_id.value().hash(&mut hasher);
        let bucket = hasher.finish() % u64::from(self.shard_count);
        // bucket < shard_count, which is a u32
        u32::try_from(bucket).unwrap_or(0)
    }

    /// Partition key a span is indexed under.
    pub fn write_bucket(&self, service: &str, span_id: SpanId) -> String {
        bucket_key(service, self.bucket_for(span_id))
    }

    /// Every partition key a search for `service` must visit.
    pub fn bucket_keys<'a>(&self, service: &'a str) -> impl Iterator<Item = String> + 'a {
        (0..self.shard_count).map(move |bucket| bucket_key(service, bucket))
    }
}
