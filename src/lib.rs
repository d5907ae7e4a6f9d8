//! tracekv - Jaeger-style trace storage over a wide-column key-value store.
//!
//! tracekv stores spans, the service and operation registries, and
//! service-to-service call counts in four tables of a DynamoDB-like store,
//! and answers the trace queries a tracing UI issues against them.
//!
//! # Features
//!
//! - **Sharded search index**: spans of one service spread over a fixed
//!   number of index partitions, searched concurrently with early stop
//! - **Deduplicated registries**: service and operation rows are written at
//!   most once per window, tracked by bounded LRU caches
//! - **Dependency counters**: call edges derived in a background task and
//!   merged into hour-bucketed additive counters
//! - **In-process store**: [`store::MemoryStore`] implements the full store
//!   contract for tests and local use
//!
//! # Architecture
//!
//! - `core`: domain types, errors, configuration and logging
//! - `store`: store client contract, schemas, provisioning, memory store
//! - `spanstore`: span read and write engines
//! - `depstore`: dependency derivation, aggregation, reads
//! - `backend`: wiring of all of the above from one config
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tracekv::store::{MemoryStore, StoreClient};
//! use tracekv::{Backend, Config, SpanReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn StoreClient> = Arc::new(MemoryStore::new());
//!     let backend = Backend::start(Config::default(), store).await?;
//!     let services = backend.span_reader().get_services().await?;
//!     println!("{:?}", services);
//!     backend.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod backend;
pub mod core;
pub mod depstore;
pub mod spanstore;
pub mod store;

// Re-export core types for convenience
pub use crate::backend::Backend;
pub use crate::core::{Config, Result, TraceKvError};
pub use crate::depstore::DependencyReader;
pub use crate::spanstore::{SpanReader, SpanWriter};
