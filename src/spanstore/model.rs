//! Conversion between domain spans and stored rows.
//!
//! Pure functions, no I/O. Timestamps are stored as epoch nanoseconds,
//! durations as nanoseconds, expiry as epoch seconds.

use crate::core::{
    KeyValue, Log, Operation, Process, RefType, Result, Span, SpanId, SpanRef, TagValue, TraceId,
    TraceKvError,
};
use crate::store::schema::{
    DURATION, EXPIRES_AT, FIELDS, FLAGS, LOGS, NAME, OPERATION_NAME, PROCESS, PROCESS_ID,
    REFERENCES, REF_TYPE, SEARCHABLE_TAGS, SERVICE_NAME, SERVICE_NAME_BUCKET, SPAN_ID, SPAN_KIND,
    START_TIME, TAGS, TAG_KEY, TAG_TYPE, TAG_VALUE, TIMESTAMP, TRACE_ID, WARNINGS,
};
use crate::store::{required, required_n, required_s, AttributeValue, Item};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Epoch seconds at which a row written at `now` expires.
pub fn expires_at(now: DateTime<Utc>, retention: Duration) -> i64 {
    let retention = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
    now.timestamp().saturating_add(retention)
}

/// Epoch nanoseconds of a timestamp.
pub fn to_nanos(time: DateTime<Utc>) -> Result<i64> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| TraceKvError::invalid_span(format!("timestamp {} out of range", time)))
}

fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

/// Nanoseconds of a duration.
pub fn duration_nanos(duration: Duration) -> Result<u64> {
    u64::try_from(duration.as_nanos())
        .map_err(|_| TraceKvError::invalid_span(format!("duration {:?} out of range", duration)))
}

fn tag_to_value(tag: &KeyValue) -> AttributeValue {
    let value = match &tag.value {
        TagValue::String(s) => AttributeValue::s(s.as_str()),
        TagValue::Bool(b) => AttributeValue::Bool(*b),
        TagValue::Int64(i) => AttributeValue::n(i),
        TagValue::Float64(f) => AttributeValue::n(f),
        TagValue::Binary(bytes) => AttributeValue::B(bytes.clone()),
    };
    AttributeValue::M(HashMap::from([
        (TAG_KEY.to_string(), AttributeValue::s(tag.key.as_str())),
        (TAG_TYPE.to_string(), AttributeValue::s(tag.value.type_name())),
        (TAG_VALUE.to_string(), value),
    ]))
}

fn tags_to_value(tags: &[KeyValue]) -> AttributeValue {
    AttributeValue::L(tags.iter().map(tag_to_value).collect())
}

fn value_to_tag(value: &AttributeValue) -> Result<KeyValue> {
    let map = value
        .as_m()
        .ok_or_else(|| TraceKvError::invalid_item(format!("tag must be M, got {}", value.type_name())))?;
    let key = required_s(map, TAG_KEY)?.to_string();
    let tag_type = required_s(map, TAG_TYPE)?;
    let raw = required(map, TAG_VALUE)?;
    let bad = || TraceKvError::invalid_item(format!("tag {} is not a valid {} value", key, tag_type));
    let value = match tag_type {
        "string" => TagValue::String(raw.as_s().ok_or_else(bad)?.to_string()),
        "bool" => TagValue::Bool(raw.as_bool().ok_or_else(bad)?),
        "int64" => TagValue::Int64(raw.as_n().ok_or_else(bad)?),
        "float64" => TagValue::Float64(raw.as_n().ok_or_else(bad)?),
        "binary" => TagValue::Binary(raw.as_b().ok_or_else(bad)?.to_vec()),
        other => {
            return Err(TraceKvError::invalid_item(format!("unknown tag type {} for {}", other, key)))
        }
    };
    Ok(KeyValue { key, value })
}

fn value_to_tags(value: Option<&AttributeValue>) -> Result<Vec<KeyValue>> {
    match value {
        None | Some(AttributeValue::Null) => Ok(Vec::new()),
        Some(AttributeValue::L(tags)) => tags.iter().map(value_to_tag).collect(),
        Some(other) => Err(TraceKvError::invalid_item(format!(
            "tags must be L, got {}",
            other.type_name()
        ))),
    }
}

/// Flattened `key -> search string` view of span, process and log tags.
/// Log fields override process tags, which override span tags.
pub fn searchable_tags(span: &Span) -> HashMap<String, AttributeValue> {
    span.tags
        .iter()
        .chain(&span.process.tags)
        .chain(span.logs.iter().flat_map(|log| &log.fields))
        .map(|kv| (kv.key.clone(), AttributeValue::s(kv.value.as_search_string())))
        .collect()
}

/// Builds the span row, indexed under `bucket`.
pub fn span_to_item(span: &Span, bucket: &str, expires_at: i64) -> Result<Item> {
    let references = span
        .references
        .iter()
        .map(|r| {
            AttributeValue::M(HashMap::from([
                (TRACE_ID.to_string(), AttributeValue::s(r.trace_id.to_string())),
                (SPAN_ID.to_string(), AttributeValue::s(r.span_id.to_string())),
                (REF_TYPE.to_string(), AttributeValue::s(r.ref_type.as_str())),
            ]))
        })
        .collect();

    let logs = span
        .logs
        .iter()
        .map(|log| {
            Ok(AttributeValue::M(HashMap::from([
                (TIMESTAMP.to_string(), AttributeValue::n(to_nanos(log.timestamp)?)),
                (FIELDS.to_string(), tags_to_value(&log.fields)),
            ])))
        })
        .collect::<Result<Vec<_>>>()?;

    let process = AttributeValue::M(HashMap::from([
        (SERVICE_NAME.to_string(), AttributeValue::s(span.process.service_name.as_str())),
        (TAGS.to_string(), tags_to_value(&span.process.tags)),
    ]));

    let mut item = Item::new();
    item.insert(TRACE_ID.to_string(), AttributeValue::s(span.trace_id.to_string()));
    item.insert(SPAN_ID.to_string(), AttributeValue::s(span.span_id.to_string()));
    item.insert(OPERATION_NAME.to_string(), AttributeValue::s(span.operation_name.as_str()));
    item.insert(REFERENCES.to_string(), AttributeValue::L(references));
    item.insert(FLAGS.to_string(), AttributeValue::n(span.flags));
    item.insert(START_TIME.to_string(), AttributeValue::n(to_nanos(span.start_time)?));
    item.insert(DURATION.to_string(), AttributeValue::n(duration_nanos(span.duration)?));
    item.insert(TAGS.to_string(), tags_to_value(&span.tags));
    item.insert(SEARCHABLE_TAGS.to_string(), AttributeValue::M(searchable_tags(span)));
    item.insert(LOGS.to_string(), AttributeValue::L(logs));
    item.insert(PROCESS.to_string(), process);
    item.insert(SERVICE_NAME.to_string(), AttributeValue::s(span.service_name()));
    item.insert(SERVICE_NAME_BUCKET.to_string(), AttributeValue::s(bucket));
    item.insert(PROCESS_ID.to_string(), AttributeValue::s(span.process_id.as_str()));
    item.insert(
        WARNINGS.to_string(),
        AttributeValue::L(span.warnings.iter().map(|w| AttributeValue::s(w.as_str())).collect()),
    );
    item.insert(EXPIRES_AT.to_string(), AttributeValue::n(expires_at));
    Ok(item)
}

fn list<'a>(item: &'a Item, attribute: &str) -> Result<&'a [AttributeValue]> {
    match item.get(attribute) {
        None | Some(AttributeValue::Null) => Ok(&[]),
        Some(value) => value.as_l().ok_or_else(|| {
            TraceKvError::invalid_item(format!("attribute {} must be L, got {}", attribute, value.type_name()))
        }),
    }
}

fn as_map<'a>(value: &'a AttributeValue, what: &str) -> Result<&'a Item> {
    value
        .as_m()
        .ok_or_else(|| TraceKvError::invalid_item(format!("{} must be M, got {}", what, value.type_name())))
}

/// Reads the trace ID of a span row or search index entry.
pub fn item_trace_id(item: &Item) -> Result<TraceId> {
    TraceId::from_hex(required_s(item, TRACE_ID)?)
}

/// Rebuilds a span from its row.
pub fn item_to_span(item: &Item) -> Result<Span> {
    let references = list(item, REFERENCES)?
        .iter()
        .map(|value| {
            let map = as_map(value, "reference")?;
            Ok(SpanRef {
                trace_id: TraceId::from_hex(required_s(map, TRACE_ID)?)?,
                span_id: SpanId::from_hex(required_s(map, SPAN_ID)?)?,
                ref_type: RefType::parse(required_s(map, REF_TYPE)?)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let logs = list(item, LOGS)?
        .iter()
        .map(|value| {
            let map = as_map(value, "log")?;
            Ok(Log {
                timestamp: from_nanos(required_n(map, TIMESTAMP)?),
                fields: value_to_tags(map.get(FIELDS))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let process = as_map(required(item, PROCESS)?, "process")?;
    let warnings = list(item, WARNINGS)?
        .iter()
        .map(|w| {
            w.as_s()
                .map(str::to_string)
                .ok_or_else(|| TraceKvError::invalid_item("warnings must be strings"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Span {
        trace_id: item_trace_id(item)?,
        span_id: SpanId::from_hex(required_s(item, SPAN_ID)?)?,
        operation_name: required_s(item, OPERATION_NAME)?.to_string(),
        references,
        flags: required_n(item, FLAGS)?,
        start_time: from_nanos(required_n(item, START_TIME)?),
        duration: Duration::from_nanos(required_n(item, DURATION)?),
        tags: value_to_tags(item.get(TAGS))?,
        logs,
        process: Process {
            service_name: required_s(process, SERVICE_NAME)?.to_string(),
            tags: value_to_tags(process.get(TAGS))?,
        },
        process_id: item.get(PROCESS_ID).and_then(AttributeValue::as_s).unwrap_or_default().to_string(),
        warnings,
    })
}

pub fn service_item(service_name: &str, expires_at: i64) -> Item {
    Item::from([
        (NAME.to_string(), AttributeValue::s(service_name)),
        (EXPIRES_AT.to_string(), AttributeValue::n(expires_at)),
    ])
}

pub fn item_to_service(item: &Item) -> Result<String> {
    required_s(item, NAME).map(str::to_string)
}

pub fn operation_item(span: &Span, expires_at: i64) -> Item {
    Item::from([
        (SERVICE_NAME.to_string(), AttributeValue::s(span.service_name())),
        (NAME.to_string(), AttributeValue::s(span.operation_name.as_str())),
        (SPAN_KIND.to_string(), AttributeValue::s(span.span_kind())),
        (EXPIRES_AT.to_string(), AttributeValue::n(expires_at)),
    ])
}

pub fn item_to_operation(item: &Item) -> Result<Operation> {
    Ok(Operation {
        name: required_s(item, NAME)?.to_string(),
        span_kind: item.get(SPAN_KIND).and_then(AttributeValue::as_s).unwrap_or_default().to_string(),
    })
}
