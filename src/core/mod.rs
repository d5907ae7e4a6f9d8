//! Core domain models, errors and configuration for tracekv.
//!
//! This module contains the tracing data model shared by the span and
//! dependency stores, the crate error type, and the configuration layer.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{ErrorKind, Result, TraceKvError};
pub use types::{
    DependencyLink, KeyValue, Log, Operation, OperationQuery, Process, RefType, Span,
    SpanBuilder, SpanId, SpanRef, TagValue, Trace, TraceId, TraceQuery,
};
