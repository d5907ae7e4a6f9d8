//! Table layouts and attribute names.

/// Type of a key attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    S,
    N,
    B,
}

/// One key attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttribute {
    pub name: String,
    pub key_type: KeyType,
}

/// Partition key plus optional sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub partition: KeyAttribute,
    pub sort: Option<KeyAttribute>,
}

impl KeySchema {
    pub fn hash(name: &str, key_type: KeyType) -> Self {
        Self {
            partition: KeyAttribute {
                name: name.to_string(),
                key_type,
            },
            sort: None,
        }
    }

    pub fn composite(partition: &str, partition_type: KeyType, sort: &str, sort_type: KeyType) -> Self {
        Self {
            partition: KeyAttribute {
                name: partition.to_string(),
                key_type: partition_type,
            },
            sort: Some(KeyAttribute {
                name: sort.to_string(),
                key_type: sort_type,
            }),
        }
    }

    /// Names of all key attributes
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition.name.as_str()).chain(self.sort.iter().map(|s| s.name.as_str()))
    }
}

/// Attributes copied into a secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    KeysOnly,
    Include(Vec<String>),
    All,
}

/// Global secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub key: KeySchema,
    pub projection: Projection,
}

/// Table definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub key: KeySchema,
    pub indexes: Vec<IndexSchema>,
    /// Epoch-seconds attribute the store expires rows by
    pub ttl_attribute: Option<String>,
}

impl TableSchema {
    pub fn new<S: Into<String>>(name: S, key: KeySchema) -> Self {
        Self {
            name: name.into(),
            key,
            indexes: Vec::new(),
            ttl_attribute: None,
        }
    }

    pub fn index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn ttl<S: Into<String>>(mut self, attribute: S) -> Self {
        self.ttl_attribute = Some(attribute.into());
        self
    }

    pub fn find_index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Creating,
    Active,
    Deleting,
}

/// Search index over the spans table
pub const SPAN_SEARCH_INDEX: &str = "SpanSearchIndex";

/// Expiry attribute shared by the span, service and operation tables
pub const EXPIRES_AT: &str = "ExpiresAt";

// Span rows
pub const TRACE_ID: &str = "TraceID";
pub const SPAN_ID: &str = "SpanID";
pub const OPERATION_NAME: &str = "OperationName";
pub const REFERENCES: &str = "References";
pub const REF_TYPE: &str = "RefType";
pub const FLAGS: &str = "Flags";
pub const START_TIME: &str = "StartTime";
pub const DURATION: &str = "Duration";
pub const TAGS: &str = "Tags";
pub const SEARCHABLE_TAGS: &str = "SearchableTags";
pub const LOGS: &str = "Logs";
pub const TIMESTAMP: &str = "Timestamp";
pub const FIELDS: &str = "Fields";
pub const PROCESS: &str = "Process";
pub const PROCESS_ID: &str = "ProcessID";
pub const SERVICE_NAME: &str = "ServiceName";
pub const SERVICE_NAME_BUCKET: &str = "ServiceNameBucket";
pub const WARNINGS: &str = "Warnings";
pub const TAG_KEY: &str = "Key";
pub const TAG_TYPE: &str = "Type";
pub const TAG_VALUE: &str = "Value";

// Registry rows
pub const NAME: &str = "Name";
pub const SPAN_KIND: &str = "SpanKind";

// Dependency rows
pub const DEPENDENCY_KEY: &str = "Key";
pub const CALL_TIME_BUCKET: &str = "CallTimeBucket";
pub const PARENT: &str = "Parent";
pub const CHILD: &str = "Child";
pub const CALL_COUNT: &str = "CallCount";
pub const SOURCE: &str = "Source";

/// Spans keyed by trace and span ID, searchable by sharded service bucket.
pub fn spans_table(name: &str) -> TableSchema {
    TableSchema::new(name, KeySchema::composite(TRACE_ID, KeyType::S, SPAN_ID, KeyType::S))
        .index(IndexSchema {
            name: SPAN_SEARCH_INDEX.to_string(),
            key: KeySchema::composite(SERVICE_NAME_BUCKET, KeyType::S, START_TIME, KeyType::N),
            projection: Projection::Include(vec![
                OPERATION_NAME.to_string(),
                DURATION.to_string(),
                SEARCHABLE_TAGS.to_string(),
            ]),
        })
        .ttl(EXPIRES_AT)
}

pub fn services_table(name: &str) -> TableSchema {
    TableSchema::new(name, KeySchema::hash(NAME, KeyType::S)).ttl(EXPIRES_AT)
}

pub fn operations_table(name: &str) -> TableSchema {
    TableSchema::new(name, KeySchema::composite(SERVICE_NAME, KeyType::S, NAME, KeyType::S))
        .ttl(EXPIRES_AT)
}

/// Counter rows are written without `ExpiresAt`, so expiry stays inert
/// until rows carry one.
pub fn dependencies_table(name: &str) -> TableSchema {
    TableSchema::new(
        name,
        KeySchema::composite(DEPENDENCY_KEY, KeyType::S, CALL_TIME_BUCKET, KeyType::N),
    )
    .ttl(EXPIRES_AT)
}
