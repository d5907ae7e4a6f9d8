//! Wide-column store boundary.
//!
//! Everything the adapter needs from the underlying key-value store goes
//! through [`StoreClient`]: partition queries, scans, single-item puts,
//! additive updates, and table lifecycle calls. Requests are plain data so
//! the same adapter code runs against [`memory::MemoryStore`] or a network
//! client.

use crate::core::{Result, TraceKvError};
use futures::stream::{self, Stream, TryStreamExt};
use std::collections::HashMap;
use std::str::FromStr;

pub mod expression;
pub mod memory;
pub mod provision;
pub mod schema;

pub use expression::{AttributePath, Condition, KeyCondition};
pub use memory::{MemoryStore, OperationCounts};
pub use schema::{IndexSchema, KeySchema, KeyType, Projection, TableSchema, TableStatus};

/// A single stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// String
    S(String),
    /// Number, kept in its decimal string form
    N(String),
    /// Binary
    B(Vec<u8>),
    /// Boolean
    Bool(bool),
    /// Explicit null
    Null,
    /// Ordered list
    L(Vec<AttributeValue>),
    /// Nested map
    M(HashMap<String, AttributeValue>),
}

/// A stored row: attribute name to value.
pub type Item = HashMap<String, AttributeValue>;

impl AttributeValue {
    /// Creates a string value
    pub fn s<S: Into<String>>(value: S) -> Self {
        AttributeValue::S(value.into())
    }

    /// Creates a number value
    pub fn n<T: ToString>(value: T) -> Self {
        AttributeValue::N(value.to_string())
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    /// Parses a number value into `T`
    pub fn as_n<T: FromStr>(&self) -> Option<T> {
        match self {
            AttributeValue::N(n) => n.parse().ok(),
            _ => None,
        }
    }

    pub fn as_b(&self) -> Option<&[u8]> {
        match self {
            AttributeValue::B(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_l(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::L(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_m(&self) -> Option<&HashMap<String, AttributeValue>> {
        match self {
            AttributeValue::M(m) => Some(m),
            _ => None,
        }
    }

    /// Short type descriptor used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::S(_) => "S",
            AttributeValue::N(_) => "N",
            AttributeValue::B(_) => "B",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null => "NULL",
            AttributeValue::L(_) => "L",
            AttributeValue::M(_) => "M",
        }
    }
}

/// Partition query, optionally against a secondary index.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    pub index: Option<String>,
    pub key_condition: KeyCondition,
    /// Evaluated after the key condition and the page limit
    pub filter: Option<Condition>,
    /// Top-level attributes to return; all projected attributes when `None`
    pub projection: Option<Vec<String>>,
    pub scan_forward: bool,
    /// Maximum number of items evaluated for one page
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
}

impl QueryRequest {
    pub fn new<S: Into<String>>(table: S, key_condition: KeyCondition) -> Self {
        Self {
            table: table.into(),
            index: None,
            key_condition,
            filter: None,
            projection: None,
            scan_forward: true,
            limit: None,
            exclusive_start_key: None,
        }
    }

    pub fn index<S: Into<String>>(mut self, index: S) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn filter(mut self, filter: Option<Condition>) -> Self {
        self.filter = filter;
        self
    }

    pub fn projection(mut self, attributes: &[&str]) -> Self {
        self.projection = Some(attributes.iter().map(|a| (*a).to_string()).collect());
        self
    }

    /// Return items in descending sort key order
    pub fn descending(mut self) -> Self {
        self.scan_forward = false;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Full-table scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub filter: Option<Condition>,
    pub projection: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
}

impl ScanRequest {
    pub fn new<S: Into<String>>(table: S) -> Self {
        Self {
            table: table.into(),
            filter: None,
            projection: None,
            limit: None,
            exclusive_start_key: None,
        }
    }

    pub fn filter(mut self, filter: Option<Condition>) -> Self {
        self.filter = filter;
        self
    }

    pub fn projection(mut self, attributes: &[&str]) -> Self {
        self.projection = Some(attributes.iter().map(|a| (*a).to_string()).collect());
        self
    }
}

/// Write (or overwrite) one item.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub table: String,
    pub item: Item,
}

impl PutRequest {
    pub fn new<S: Into<String>>(table: S, item: Item) -> Self {
        Self {
            table: table.into(),
            item,
        }
    }
}

/// One attribute update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    /// Replace the attribute
    Set(String, AttributeValue),
    /// Add a number to the attribute, treating a missing attribute as zero
    Add(String, AttributeValue),
}

/// Update one item in place, creating it when absent.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub table: String,
    pub key: Item,
    pub actions: Vec<UpdateAction>,
}

impl UpdateRequest {
    pub fn new<S: Into<String>>(table: S, key: Item) -> Self {
        Self {
            table: table.into(),
            key,
            actions: Vec::new(),
        }
    }

    pub fn set<S: Into<String>>(mut self, attribute: S, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Set(attribute.into(), value));
        self
    }

    pub fn add<S: Into<String>>(mut self, attribute: S, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Add(attribute.into(), value));
        self
    }
}

/// One page of a query or scan.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Item>,
    /// Present when more items may follow; resume by passing it back as
    /// `exclusive_start_key`
    pub last_evaluated_key: Option<Item>,
}

/// Client for the wide-column store.
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    /// Query one partition of a table or index.
    async fn query(&self, request: &QueryRequest) -> Result<Page>;

    /// Scan a whole table.
    async fn scan(&self, request: &ScanRequest) -> Result<Page>;

    /// Write one item, replacing any item with the same key.
    async fn put_item(&self, request: &PutRequest) -> Result<()>;

    /// Update one item, creating it when absent.
    async fn update_item(&self, request: &UpdateRequest) -> Result<()>;

    /// Create a table with its indexes.
    async fn create_table(&self, schema: &TableSchema) -> Result<()>;

    /// Delete a table. Returns false when it did not exist.
    async fn delete_table(&self, name: &str) -> Result<bool>;

    /// Current status of a table, `None` when it does not exist.
    async fn describe_table(&self, name: &str) -> Result<Option<TableStatus>>;

    /// Enable row expiry on the given epoch-seconds attribute.
    async fn enable_ttl(&self, name: &str, attribute: &str) -> Result<()>;

    async fn list_tables(&self) -> Result<Vec<String>>;
}

/// Lazily pages through a query. A page is requested only when the
/// previous one has been consumed.
pub fn query_pages<'a, S>(
    client: &'a S,
    request: QueryRequest,
) -> impl Stream<Item = Result<Vec<Item>>> + Send + 'a
where
    S: StoreClient + ?Sized,
{
    stream::try_unfold(Some(request), move |state| async move {
        let mut request = match state {
            Some(request) => request,
            None => return Ok(None),
        };
        let page = client.query(&request).await.map_err(|e| {
            e.context(format!("failed to query page from {}", request.table))
        })?;
        let next = page.last_evaluated_key.map(|key| {
            request.exclusive_start_key = Some(key);
            request
        });
        Ok::<_, TraceKvError>(Some((page.items, next)))
    })
}

/// Lazily pages through a scan.
pub fn scan_pages<'a, S>(
    client: &'a S,
    request: ScanRequest,
) -> impl Stream<Item = Result<Vec<Item>>> + Send + 'a
where
    S: StoreClient + ?Sized,
{
    stream::try_unfold(Some(request), move |state| async move {
        let mut request = match state {
            Some(request) => request,
            None => return Ok(None),
        };
        let page = client.scan(&request).await.map_err(|e| {
            e.context(format!("failed to scan page from {}", request.table))
        })?;
        let next = page.last_evaluated_key.map(|key| {
            request.exclusive_start_key = Some(key);
            request
        });
        Ok::<_, TraceKvError>(Some((page.items, next)))
    })
}

/// Runs a query to exhaustion.
pub async fn query_all<S>(client: &S, request: QueryRequest) -> Result<Vec<Item>>
where
    S: StoreClient + ?Sized,
{
    query_pages(client, request).try_concat().await
}

/// Runs a scan to exhaustion.
pub async fn scan_all<S>(client: &S, request: ScanRequest) -> Result<Vec<Item>>
where
    S: StoreClient + ?Sized,
{
    scan_pages(client, request).try_concat().await
}

/// Returns a required attribute of an item.
pub fn required<'a>(item: &'a Item, attribute: &str) -> Result<&'a AttributeValue> {
    item.get(attribute)
        .ok_or_else(|| TraceKvError::invalid_item(format!("missing attribute {}", attribute)))
}

/// Returns a required string attribute of an item.
pub fn required_s<'a>(item: &'a Item, attribute: &str) -> Result<&'a str> {
    let value = required(item, attribute)?;
    value.as_s().ok_or_else(|| {
        TraceKvError::invalid_item(format!(
            "attribute {} must be S, got {}",
            attribute,
            value.type_name()
        ))
    })
}

/// Returns a required number attribute of an item.
pub fn required_n<T: FromStr>(item: &Item, attribute: &str) -> Result<T> {
    let value = required(item, attribute)?;
    value.as_n().ok_or_else(|| {
        TraceKvError::invalid_item(format!(
            "attribute {} must be a number, got {:?}",
            attribute, value
        ))
    })
}
