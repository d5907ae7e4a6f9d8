use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceKvError {
    #[error("Trace not found: {0}")]
    TraceNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid span data: {0}")]
    InvalidSpan(String),

    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{operation} fan-out failed: {source}")]
    Fanout {
        operation: &'static str,
        #[source]
        source: Box<TraceKvError>,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<TraceKvError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Dependency aggregator is not running")]
    AggregatorClosed,

    #[error("Timeout error: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Result type alias for tracekv operations
pub type Result<T> = std::result::Result<T, TraceKvError>;

/// Error classes visible to the tracing host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The requested trace has no stored spans
    NotFound,
    /// A required query parameter is missing or invalid
    InvalidQuery,
    /// The store client failed (I/O, pagination, table lifecycle)
    StoreFailure,
    /// One branch of a concurrent fan-out failed
    PartialFanoutFailure,
    /// A stored row could not be converted to the domain model
    Conversion,
    /// Invalid configuration
    Config,
    /// The dependency aggregator task is gone
    Aggregator,
}

impl TraceKvError {
    /// Creates a new invalid query error
    pub fn invalid_query<S: Into<String>>(msg: S) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Creates a new store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new item conversion error
    pub fn invalid_item<S: Into<String>>(msg: S) -> Self {
        Self::InvalidItem(msg.into())
    }

    /// Creates a new span conversion error
    pub fn invalid_span<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSpan(msg.into())
    }

    /// Wraps this error with a description of the failed operation
    pub fn context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Marks this error as the first failure of a concurrent fan-out
    pub fn fanout(operation: &'static str, source: Self) -> Self {
        Self::Fanout {
            operation,
            source: Box::new(source),
        }
    }

    /// Returns the innermost error, skipping context layers
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } | Self::Fanout { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns the host-visible class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Fanout { .. } => ErrorKind::PartialFanoutFailure,
            Self::Context { source, .. } => source.kind(),
            Self::TraceNotFound(_) => ErrorKind::NotFound,
            Self::InvalidQuery(_) => ErrorKind::InvalidQuery,
            Self::Store(_) | Self::Io(_) | Self::Timeout { .. } => ErrorKind::StoreFailure,
            Self::InvalidSpan(_) | Self::InvalidItem(_) => ErrorKind::Conversion,
            Self::Config(_) => ErrorKind::Config,
            Self::Join(_) | Self::AggregatorClosed => ErrorKind::Aggregator,
        }
    }

    /// Returns true if the trace was not found, looking through wrappers
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::TraceNotFound(_))
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self.root() {
            Self::TraceNotFound(_) => "not_found",
            Self::InvalidQuery(_) => "query",
            Self::Store(_) => "store",
            Self::InvalidSpan(_) | Self::InvalidItem(_) => "conversion",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Join(_) | Self::AggregatorClosed => "async",
            Self::Timeout { .. } => "timeout",
            Self::Fanout { .. } | Self::Context { .. } => "wrapped",
        }
    }
}
