use crate::core::error::{Result, TraceKvError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Tag key carrying the span kind (`client`, `server`, ...)
pub const SPAN_KIND_TAG: &str = "span.kind";

/// Unique identifier for a trace (128 bits, rendered as 32 hex characters)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId(u128);

/// Unique identifier for a span within a trace (64 bits, 16 hex characters)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpanId(u64);

fn parse_hex_id(id: &str, max_len: usize, what: &str) -> Result<u128> {
    if id.is_empty() {
        return Err(TraceKvError::invalid_span(format!("{} cannot be empty", what)));
    }
    if id.len() > max_len {
        return Err(TraceKvError::invalid_span(format!(
            "{} cannot exceed {} characters, got {}",
            what,
            max_len,
            id.len()
        )));
    }
    u128::from_str_radix(id, 16)
        .map_err(|e| TraceKvError::invalid_span(format!("{} {:?} is not hex: {}", what, id, e)))
}

impl TraceId {
    /// Creates a trace ID from its numeric value
    pub const fn new(value: u128) -> Self {
        TraceId(value)
    }

    /// Parses a trace ID from up to 32 hex characters
    pub fn from_hex(id: &str) -> Result<Self> {
        parse_hex_id(id, 32, "TraceId").map(TraceId)
    }

    /// Returns the numeric value
    pub fn value(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = TraceKvError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for TraceId {
    type Error = TraceKvError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.to_string()
    }
}

impl SpanId {
    /// Creates a span ID from its numeric value
    pub const fn new(value: u64) -> Self {
        SpanId(value)
    }

    /// Parses a span ID from up to 16 hex characters
    pub fn from_hex(id: &str) -> Result<Self> {
        let value = parse_hex_id(id, 16, "SpanId")?;
        u64::try_from(value)
            .map(SpanId)
            .map_err(|_| TraceKvError::invalid_span(format!("SpanId {:?} out of range", id)))
    }

    /// Returns the numeric value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = TraceKvError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<String> for SpanId {
    type Error = TraceKvError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<SpanId> for String {
    fn from(id: SpanId) -> Self {
        id.to_string()
    }
}

/// Typed value of a span, process or log tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum TagValue {
    /// UTF-8 string
    String(String),
    /// Boolean
    Bool(bool),
    /// Signed 64-bit integer
    Int64(i64),
    /// 64-bit float
    Float64(f64),
    /// Opaque bytes
    Binary(Vec<u8>),
}

impl TagValue {
    /// Renders the value the way it is matched by tag searches
    pub fn as_search_string(&self) -> String {
        match self {
            TagValue::String(s) => s.clone(),
            TagValue::Bool(b) => b.to_string(),
            TagValue::Int64(i) => i.to_string(),
            TagValue::Float64(f) => f.to_string(),
            TagValue::Binary(bytes) => hex::encode(bytes),
        }
    }

    /// Short type name used in stored rows
    pub fn type_name(&self) -> &'static str {
        match self {
            TagValue::String(_) => "string",
            TagValue::Bool(_) => "bool",
            TagValue::Int64(_) => "int64",
            TagValue::Float64(_) => "float64",
            TagValue::Binary(_) => "binary",
        }
    }
}

/// A tag: key plus typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: TagValue,
}

impl KeyValue {
    /// Creates a string tag
    pub fn string<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: TagValue::String(value.into()),
        }
    }

    /// Creates a bool tag
    pub fn bool<K: Into<String>>(key: K, value: bool) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Bool(value),
        }
    }

    /// Creates an int64 tag
    pub fn int64<K: Into<String>>(key: K, value: i64) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Int64(value),
        }
    }

    /// Creates a float64 tag
    pub fn float64<K: Into<String>>(key: K, value: f64) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Float64(value),
        }
    }

    /// Creates a binary tag
    pub fn binary<K: Into<String>>(key: K, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Binary(value),
        }
    }
}

/// Kind of causal reference between spans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefType {
    /// The referenced span is the parent
    ChildOf,
    /// The referenced span precedes this one without waiting on it
    FollowsFrom,
}

impl RefType {
    /// Name stored in span rows
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::ChildOf => "CHILD_OF",
            RefType::FollowsFrom => "FOLLOWS_FROM",
        }
    }

    /// Parses a stored reference type name
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "CHILD_OF" => Ok(RefType::ChildOf),
            "FOLLOWS_FROM" => Ok(RefType::FollowsFrom),
            other => Err(TraceKvError::invalid_span(format!("unknown reference type {:?}", other))),
        }
    }
}

/// Reference from one span to another
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanRef {
    /// Trace of the referenced span
    pub trace_id: TraceId,
    /// Referenced span
    pub span_id: SpanId,
    /// Reference kind
    pub ref_type: RefType,
}

impl SpanRef {
    /// Creates a child-of reference
    pub fn child_of(trace_id: TraceId, span_id: SpanId) -> Self {
        Self {
            trace_id,
            span_id,
            ref_type: RefType::ChildOf,
        }
    }
}

/// Timestamped log event attached to a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Event fields
    #[serde(default)]
    pub fields: Vec<KeyValue>,
}

/// Process that emitted a span
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Process {
    /// Name of the emitting service
    pub service_name: String,
    /// Process-level tags (host, version, ...)
    #[serde(default)]
    pub tags: Vec<KeyValue>,
}

/// A single timed operation within a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Trace this span belongs to
    pub trace_id: TraceId,
    /// Identifier of this span
    pub span_id: SpanId,
    /// Name of the operation this span represents
    pub operation_name: String,
    /// Causal references to other spans
    #[serde(default)]
    pub references: Vec<SpanRef>,
    /// Sampling and debug flags
    #[serde(default)]
    pub flags: u32,
    /// When the span started
    pub start_time: DateTime<Utc>,
    /// How long the span took
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Span tags
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    /// Log events
    #[serde(default)]
    pub logs: Vec<Log>,
    /// Emitting process
    pub process: Process,
    /// Process identifier within a batch
    #[serde(default)]
    pub process_id: String,
    /// Warnings attached during ingestion
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Span {
    /// Creates a new span builder
    pub fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    /// Returns the emitting service name
    pub fn service_name(&self) -> &str {
        &self.process.service_name
    }

    /// Returns the span kind from the `span.kind` tag, or an empty string
    pub fn span_kind(&self) -> &str {
        self.tags
            .iter()
            .find(|kv| kv.key == SPAN_KIND_TAG)
            .and_then(|kv| match &kv.value {
                TagValue::String(s) => Some(s.as_str()),
                _ => None,
            })
            .unwrap_or("")
    }
}

/// Builder for creating Span instances
#[derive(Default)]
pub struct SpanBuilder {
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    operation_name: Option<String>,
    references: Vec<SpanRef>,
    /// Parents given through `child_of`, bound to the trace ID on `build`
    parents: Vec<SpanId>,
    flags: u32,
    start_time: Option<DateTime<Utc>>,
    duration: Option<Duration>,
    tags: Vec<KeyValue>,
    logs: Vec<Log>,
    process: Process,
    process_id: String,
    warnings: Vec<String>,
}

impl SpanBuilder {
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    pub fn operation_name<S: Into<String>>(mut self, operation_name: S) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    /// Adds a child-of reference to `parent` in the span's own trace.
    pub fn child_of(mut self, parent: SpanId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn reference(mut self, reference: SpanRef) -> Self {
        self.references.push(reference);
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn tag(mut self, tag: KeyValue) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn log(mut self, log: Log) -> Self {
        self.logs.push(log);
        self
    }

    pub fn service_name<S: Into<String>>(mut self, service_name: S) -> Self {
        self.process.service_name = service_name.into();
        self
    }

    pub fn process_tag(mut self, tag: KeyValue) -> Self {
        self.process.tags.push(tag);
        self
    }

    pub fn process_id<S: Into<String>>(mut self, process_id: S) -> Self {
        self.process_id = process_id.into();
        self
    }

    pub fn warning<S: Into<String>>(mut self, warning: S) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn build(self) -> Result<Span> {
        let trace_id = self.trace_id.ok_or_else(|| TraceKvError::invalid_span("trace_id is required"))?;
        let mut references = self.references;
        references.extend(self.parents.into_iter().map(|parent| SpanRef::child_of(trace_id, parent)));
        Ok(Span {
            trace_id,
            span_id: self.span_id.ok_or_else(|| TraceKvError::invalid_span("span_id is required"))?,
            operation_name: self.operation_name.unwrap_or_default(),
            references,
            flags: self.flags,
            start_time: self.start_time.unwrap_or_else(Utc::now),
            duration: self.duration.unwrap_or(Duration::ZERO),
            tags: self.tags,
            logs: self.logs,
            process: self.process,
            process_id: self.process_id,
            warnings: self.warnings,
        })
    }
}

/// The set of spans sharing a trace identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// All stored spans of the trace, in no particular order
    pub spans: Vec<Span>,
}

impl Trace {
    /// Creates a trace from its spans
    pub fn new(spans: Vec<Span>) -> Self {
        Trace { spans }
    }

    /// Returns the trace ID shared by the spans
    pub fn trace_id(&self) -> Option<TraceId> {
        self.spans.first().map(|span| span.trace_id)
    }
}

/// A registered operation of a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Operation {
    /// Operation name
    pub name: String,
    /// Span kind the operation was observed with, empty when unknown
    pub span_kind: String,
}

/// Aggregated count of calls from a parent service to a child service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyLink {
    /// Calling service
    pub parent: String,
    /// Called service
    pub child: String,
    /// Number of observed calls
    pub call_count: u64,
}

/// Parameters of an operations lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationQuery {
    /// Service whose operations are listed (required)
    pub service_name: String,
    /// Restrict to operations observed with this span kind
    pub span_kind: Option<String>,
}

impl OperationQuery {
    /// Creates a query for all operations of a service
    pub fn new<S: Into<String>>(service_name: S) -> Self {
        Self {
            service_name: service_name.into(),
            span_kind: None,
        }
    }

    /// Restricts the query to one span kind
    pub fn span_kind<S: Into<String>>(mut self, span_kind: S) -> Self {
        self.span_kind = Some(span_kind.into());
        self
    }
}

/// Parameters of a trace search
#[derive(Debug, Clone, PartialEq)]
pub struct TraceQuery {
    /// Service the matching spans belong to (required)
    pub service_name: String,
    /// Exact operation name
    pub operation_name: Option<String>,
    /// Tags that must all match, by searchable string value
    pub tags: BTreeMap<String, String>,
    /// Earliest span start time, inclusive
    pub start_time_min: DateTime<Utc>,
    /// Latest span start time, inclusive
    pub start_time_max: DateTime<Utc>,
    /// Minimum span duration, inclusive
    pub duration_min: Option<Duration>,
    /// Maximum span duration, inclusive
    pub duration_max: Option<Duration>,
    /// Maximum number of traces to return; 0 selects the configured default
    pub num_traces: usize,
}

impl TraceQuery {
    /// Creates a search for a service within a start time window
    pub fn new<S: Into<String>>(
        service_name: S,
        start_time_min: DateTime<Utc>,
        start_time_max: DateTime<Utc>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            operation_name: None,
            tags: BTreeMap::new(),
            start_time_min,
            start_time_max,
            duration_min: None,
            duration_max: None,
            num_traces: 0,
        }
    }

    pub fn operation_name<S: Into<String>>(mut self, operation_name: S) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    pub fn tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn duration_min(mut self, duration: Duration) -> Self {
        self.duration_min = Some(duration);
        self
    }

    pub fn duration_max(mut self, duration: Duration) -> Self {
        self.duration_max = Some(duration);
        self
    }

    pub fn num_traces(mut self, num_traces: usize) -> Self {
        self.num_traces = num_traces;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_validation() {
        assert_eq!(TraceId::from_hex("11").unwrap(), TraceId::new(0x11));
        assert!(TraceId::from_hex("").is_err());
        assert!(TraceId::from_hex(&"a".repeat(33)).is_err());
        assert!(TraceId::from_hex("not-hex").is_err());
    }

    #[test]
    fn test_ids_render_fixed_width() {
        assert_eq!(TraceId::new(0x11).to_string(), format!("{:0>32}", "11"));
        assert_eq!(SpanId::new(3).to_string(), "0000000000000003");
        let parsed: SpanId = "0000000000000003".parse().unwrap();
        assert_eq!(parsed, SpanId::new(3));
    }

    #[test]
    fn test_span_builder() {
        let span = Span::builder()
            .trace_id(TraceId::new(1))
            .span_id(SpanId::new(2))
            .child_of(SpanId::new(1))
            .service_name("frontend")
            .operation_name("GET /")
            .tag(KeyValue::string(SPAN_KIND_TAG, "server"))
            .build()
            .unwrap();

        assert_eq!(span.service_name(), "frontend");
        assert_eq!(span.span_kind(), "server");
        assert_eq!(span.references, vec![SpanRef::child_of(TraceId::new(1), SpanId::new(1))]);
        assert!(Span::builder().span_id(SpanId::new(1)).build().is_err());
    }

    #[test]
    fn test_child_of_before_trace_id() {
        let span = Span::builder()
            .child_of(SpanId::new(1))
            .trace_id(TraceId::new(9))
            .span_id(SpanId::new(2))
            .build()
            .unwrap();
        assert_eq!(span.references, vec![SpanRef::child_of(TraceId::new(9), SpanId::new(1))]);
    }

    #[test]
    fn test_trace_json_round_trip() {
        let span = Span::builder()
            .trace_id(TraceId::new(0xabc))
            .span_id(SpanId::new(2))
            .child_of(SpanId::new(1))
            .operation_name("GET /")
            .duration(Duration::from_millis(15))
            .service_name("frontend")
            .tag(KeyValue::int64("http.status_code", 200))
            .tag(KeyValue::binary("payload", vec![0xde, 0xad]))
            .build()
            .unwrap();
        let trace = Trace::new(vec![span]);

        let json = serde_json::to_value(&trace).unwrap();
        let first = &json["spans"][0];
        assert_eq!(first["trace_id"], format!("{:0>32}", "abc"));
        assert_eq!(first["span_id"], "0000000000000002");
        assert_eq!(first["duration"], "15ms");
        assert_eq!(first["references"][0]["ref_type"], "child_of");
        assert_eq!(first["tags"][0]["value"]["type"], "int64");

        let decoded: Trace = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, trace);
    }

    #[test]
    fn test_tag_search_strings() {
        assert_eq!(TagValue::Bool(true).as_search_string(), "true");
        assert_eq!(TagValue::Int64(-42).as_search_string(), "-42");
        assert_eq!(TagValue::Float64(1.5).as_search_string(), "1.5");
        assert_eq!(TagValue::Binary(vec![0xde, 0xad]).as_search_string(), "dead");
    }
}
