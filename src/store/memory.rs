//! In-process wide-column store.
//!
//! Implements [`StoreClient`] with the semantics the adapter relies on:
//! composite primary keys, sparse secondary indexes with projections,
//! post-index filters, page limits with `last_evaluated_key`, additive
//! updates and TTL reaping. Per-table operation counters and failure
//! injection make it usable as a test double.

use super::schema::{KeySchema, KeyType, Projection, TableSchema, TableStatus};
use super::{
    AttributeValue, Item, Page, PutRequest, QueryRequest, ScanRequest, StoreClient, UpdateAction,
    UpdateRequest,
};
use crate::core::config::StoreConfig;
use crate::core::{Result, TraceKvError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Key attribute value in a totally ordered form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortableKey {
    Absent,
    Num(i128),
    Str(String),
    Bin(Vec<u8>),
}

type PrimaryKey = (SortableKey, SortableKey);

struct MemoryTable {
    schema: TableSchema,
    rows: RwLock<BTreeMap<PrimaryKey, Item>>,
    ttl_attribute: RwLock<Option<String>>,
    /// Describe calls left before the table reports active
    pending_polls: AtomicU32,
}

#[derive(Debug, Default)]
struct TableCounters {
    queries: AtomicU64,
    scans: AtomicU64,
    puts: AtomicU64,
    updates: AtomicU64,
}

/// Snapshot of the calls issued against one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationCounts {
    pub queries: u64,
    pub scans: u64,
    pub puts: u64,
    pub updates: u64,
}

impl OperationCounts {
    pub fn total(&self) -> u64 {
        self.queries + self.scans + self.puts + self.updates
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    table: String,
    partition: Option<AttributeValue>,
    message: String,
}

/// In-memory [`StoreClient`].
pub struct MemoryStore {
    tables: DashMap<String, Arc<MemoryTable>>,
    counters: DashMap<String, Arc<TableCounters>>,
    failures: RwLock<Vec<FailureRule>>,
    page_size: usize,
    activation_polls: u32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_page_size(config.page_size)
    }

    /// Creates a store that evaluates at most `page_size` items per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: DashMap::new(),
            counters: DashMap::new(),
            failures: RwLock::new(Vec::new()),
            page_size: page_size.max(1),
            activation_polls: 0,
        }
    }

    /// New tables report `Creating` for this many describe calls.
    pub fn with_activation_polls(mut self, polls: u32) -> Self {
        self.activation_polls = polls;
        self
    }

    /// Makes every call against `table` fail.
    pub fn fail_table(&self, table: &str, message: &str) {
        self.failures.write().push(FailureRule {
            table: table.to_string(),
            partition: None,
            message: message.to_string(),
        });
    }

    /// Makes calls against one partition of `table` (or of its indexes) fail.
    pub fn fail_partition(&self, table: &str, partition: AttributeValue, message: &str) {
        self.failures.write().push(FailureRule {
            table: table.to_string(),
            partition: Some(partition),
            message: message.to_string(),
        });
    }

    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    pub fn operation_counts(&self, table: &str) -> OperationCounts {
        self.counters
            .get(table)
            .map(|c| OperationCounts {
                queries: c.queries.load(Ordering::Relaxed),
                scans: c.scans.load(Ordering::Relaxed),
                puts: c.puts.load(Ordering::Relaxed),
                updates: c.updates.load(Ordering::Relaxed),
            })
            .unwrap_or_default()
    }

    /// Number of rows currently stored in `table`.
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.read().len())
    }

    /// Removes every row whose TTL attribute is at or before `now`.
    /// Returns the number of rows removed.
    pub fn reap_expired(&self, now: DateTime<Utc>) -> usize {
        let now = now.timestamp();
        let mut removed = 0;
        for table in &self.tables {
            let Some(attribute) = table.ttl_attribute.read().clone() else {
                continue;
            };
            let mut rows = table.rows.write();
            let before = rows.len();
            rows.retain(|_, item| {
                item.get(&attribute)
                    .and_then(AttributeValue::as_n::<i64>)
                    .map_or(true, |expires_at| expires_at > now)
            });
            removed += before - rows.len();
        }
        if removed > 0 {
            tracing::debug!("Reaped {} expired rows", removed);
        }
        removed
    }

    fn counters(&self, table: &str) -> Arc<TableCounters> {
        Arc::clone(self.counters.entry(table.to_string()).or_default().value())
    }

    fn table(&self, name: &str) -> Result<Arc<MemoryTable>> {
        self.tables
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| TraceKvError::store(format!("table {} does not exist", name)))
    }

    fn check_failure(&self, table: &str, partition: Option<&AttributeValue>) -> Result<()> {
        let failures = self.failures.read();
        let rule = failures.iter().find(|rule| {
            rule.table == table
                && match (&rule.partition, partition) {
                    (None, _) => true,
                    (Some(expected), Some(actual)) => expected == actual,
                    (Some(_), None) => false,
                }
        });
        match rule {
            Some(rule) => Err(TraceKvError::store(format!("{} on {}", rule.message, table))),
            None => Ok(()),
        }
    }

    fn run_query(&self, request: &QueryRequest) -> Result<Page> {
        self.counters(&request.table).queries.fetch_add(1, Ordering::Relaxed);
        self.check_failure(&request.table, Some(&request.key_condition.partition_value))?;
        let table = self.table(&request.table)?;

        let (index_key, index_projection) = match &request.index {
            Some(name) => {
                let index = table.schema.find_index(name).ok_or_else(|| {
                    TraceKvError::store(format!("index {} does not exist on {}", name, request.table))
                })?;
                (Some(&index.key), Some(&index.projection))
            }
            None => (None, None),
        };
        let key_schema = index_key.unwrap_or(&table.schema.key);
        if request.key_condition.partition_attribute != key_schema.partition.name {
            return Err(TraceKvError::store(format!(
                "key condition must target partition key {}, got {}",
                key_schema.partition.name, request.key_condition.partition_attribute
            )));
        }

        let rows = table.rows.read();
        let mut candidates: Vec<(Vec<SortableKey>, &Item)> = rows
            .values()
            .filter(|item| request.key_condition.matches(item))
            .filter_map(|item| position(index_key, &table.schema.key, item).map(|pos| (pos, item)))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        if !request.scan_forward {
            candidates.reverse();
        }

        let (page, last_evaluated_key) = self.paginate(
            candidates,
            request.exclusive_start_key.as_ref(),
            request.scan_forward,
            request.limit,
            index_key,
            &table.schema.key,
        )?;

        let key_names = key_attributes(index_key, &table.schema.key);
        let items = page
            .into_iter()
            .filter(|item| request.filter.as_ref().map_or(true, |f| f.matches(item)))
            .map(|item| {
                let item = match index_projection {
                    Some(projection) => project_index(item, &key_names, projection),
                    None => item.clone(),
                };
                project(item, request.projection.as_deref())
            })
            .collect();

        Ok(Page {
            items,
            last_evaluated_key,
        })
    }

    fn run_scan(&self, request: &ScanRequest) -> Result<Page> {
        self.counters(&request.table).scans.fetch_add(1, Ordering::Relaxed);
        self.check_failure(&request.table, None)?;
        let table = self.table(&request.table)?;

        let rows = table.rows.read();
        let candidates: Vec<(Vec<SortableKey>, &Item)> = rows
            .iter()
            .map(|((pk, sk), item)| (vec![pk.clone(), sk.clone()], item))
            .collect();

        let (page, last_evaluated_key) = self.paginate(
            candidates,
            request.exclusive_start_key.as_ref(),
            true,
            request.limit,
            None,
            &table.schema.key,
        )?;

        let items = page
            .into_iter()
            .filter(|item| request.filter.as_ref().map_or(true, |f| f.matches(item)))
            .map(|item| project(item.clone(), request.projection.as_deref()))
            .collect();

        Ok(Page {
            items,
            last_evaluated_key,
        })
    }

    /// Applies the exclusive start key and the page limit to ordered
    /// candidates.
    fn paginate<'a>(
        &self,
        mut candidates: Vec<(Vec<SortableKey>, &'a Item)>,
        exclusive_start_key: Option<&Item>,
        scan_forward: bool,
        limit: Option<usize>,
        index_key: Option<&KeySchema>,
        table_key: &KeySchema,
    ) -> Result<(Vec<&'a Item>, Option<Item>)> {
        if let Some(start) = exclusive_start_key {
            let start = position(index_key, table_key, start)
                .ok_or_else(|| TraceKvError::store("exclusive start key is missing key attributes"))?;
            candidates.retain(|(pos, _)| match pos.cmp(&start) {
                CmpOrdering::Greater => scan_forward,
                CmpOrdering::Less => !scan_forward,
                CmpOrdering::Equal => false,
            });
        }

        let limit = limit.unwrap_or(self.page_size).min(self.page_size).max(1);
        let more = candidates.len() > limit;
        candidates.truncate(limit);

        let last_evaluated_key = if more {
            candidates.last().map(|(_, item)| {
                let names = key_attributes(index_key, table_key);
                item.iter()
                    .filter(|(name, _)| names.contains(name.as_str()))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect::<Item>()
            })
        } else {
            None
        };

        Ok((candidates.into_iter().map(|(_, item)| item).collect(), last_evaluated_key))
    }

    fn run_put(&self, request: &PutRequest) -> Result<()> {
        self.counters(&request.table).puts.fetch_add(1, Ordering::Relaxed);
        let table = self.table(&request.table)?;
        self.check_failure(&request.table, request.item.get(&table.schema.key.partition.name))?;

        let key = primary_key(&table.schema.key, &request.item)?;
        table.rows.write().insert(key, request.item.clone());
        Ok(())
    }

    fn run_update(&self, request: &UpdateRequest) -> Result<()> {
        self.counters(&request.table).updates.fetch_add(1, Ordering::Relaxed);
        let table = self.table(&request.table)?;
        self.check_failure(&request.table, request.key.get(&table.schema.key.partition.name))?;

        let key = primary_key(&table.schema.key, &request.key)?;
        let mut rows = table.rows.write();
        let mut item = rows.get(&key).cloned().unwrap_or_else(|| request.key.clone());
        for action in &request.actions {
            match action {
                UpdateAction::Set(attribute, value) => {
                    item.insert(attribute.clone(), value.clone());
                }
                UpdateAction::Add(attribute, value) => {
                    let sum = add_numbers(item.get(attribute), value).map_err(|e| {
                        e.context(format!("failed to add to {} on {}", attribute, request.table))
                    })?;
                    item.insert(attribute.clone(), sum);
                }
            }
        }
        rows.insert(key, item);
        Ok(())
    }
}

fn sortable(value: Option<&AttributeValue>, key_type: KeyType) -> Option<SortableKey> {
    match (value?, key_type) {
        (AttributeValue::S(s), KeyType::S) => Some(SortableKey::Str(s.clone())),
        (AttributeValue::N(n), KeyType::N) => n.parse().ok().map(SortableKey::Num),
        (AttributeValue::B(b), KeyType::B) => Some(SortableKey::Bin(b.clone())),
        _ => None,
    }
}

fn primary_key(schema: &KeySchema, item: &Item) -> Result<PrimaryKey> {
    let invalid = |name: &str| {
        TraceKvError::store(format!("item is missing key attribute {} or it has the wrong type", name))
    };
    let partition = sortable(item.get(&schema.partition.name), schema.partition.key_type)
        .ok_or_else(|| invalid(&schema.partition.name))?;
    let sort = match &schema.sort {
        Some(sort) => sortable(item.get(&sort.name), sort.key_type).ok_or_else(|| invalid(&sort.name))?,
        None => SortableKey::Absent,
    };
    Ok((partition, sort))
}

/// Ordering position of an item within a table or index partition. `None`
/// when the item lacks an index key, which keeps indexes sparse.
fn position(index_key: Option<&KeySchema>, table_key: &KeySchema, item: &Item) -> Option<Vec<SortableKey>> {
    let mut pos = Vec::with_capacity(3);
    if let Some(index_key) = index_key {
        sortable(item.get(&index_key.partition.name), index_key.partition.key_type)?;
        if let Some(sort) = &index_key.sort {
            pos.push(sortable(item.get(&sort.name), sort.key_type)?);
        }
    }
    let (pk, sk) = primary_key(table_key, item).ok()?;
    pos.push(pk);
    pos.push(sk);
    Some(pos)
}

fn key_attributes<'a>(index_key: Option<&'a KeySchema>, table_key: &'a KeySchema) -> HashSet<&'a str> {
    table_key
        .attribute_names()
        .chain(index_key.into_iter().flat_map(|key| key.attribute_names()))
        .collect()
}

fn project_index(item: &Item, key_names: &HashSet<&str>, projection: &Projection) -> Item {
    item.iter()
        .filter(|(name, _)| {
            key_names.contains(name.as_str())
                || match projection {
                    Projection::KeysOnly => false,
                    Projection::Include(names) => names.iter().any(|n| n == *name),
                    Projection::All => true,
                }
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn project(mut item: Item, attributes: Option<&[String]>) -> Item {
    if let Some(attributes) = attributes {
        item.retain(|name, _| attributes.iter().any(|a| a == name));
    }
    item
}

fn add_numbers(current: Option<&AttributeValue>, delta: &AttributeValue) -> Result<AttributeValue> {
    let AttributeValue::N(delta) = delta else {
        return Err(TraceKvError::store(format!("cannot add {} value", delta.type_name())));
    };
    let current = match current {
        None => "0",
        Some(AttributeValue::N(n)) => n.as_str(),
        Some(other) => {
            return Err(TraceKvError::store(format!("cannot add to {} value", other.type_name())))
        }
    };
    if let (Ok(a), Ok(b)) = (current.parse::<i128>(), delta.parse::<i128>()) {
        return Ok(AttributeValue::n(a + b));
    }
    match (current.parse::<f64>(), delta.parse::<f64>()) {
        (Ok(a), Ok(b)) => Ok(AttributeValue::n(a + b)),
        _ => Err(TraceKvError::store(format!("invalid numbers {} + {}", current, delta))),
    }
}

#[async_trait::async_trait]
impl StoreClient for MemoryStore {
    async fn query(&self, request: &QueryRequest) -> Result<Page> {
        self.run_query(request)
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Page> {
        self.run_scan(request)
    }

    async fn put_item(&self, request: &PutRequest) -> Result<()> {
        self.run_put(request)
    }

    async fn update_item(&self, request: &UpdateRequest) -> Result<()> {
        self.run_update(request)
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        match self.tables.entry(schema.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TraceKvError::store(format!(
                "table {} already exists",
                schema.name
            ))),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(MemoryTable {
                    schema: schema.clone(),
                    rows: RwLock::new(BTreeMap::new()),
                    ttl_attribute: RwLock::new(None),
                    pending_polls: AtomicU32::new(self.activation_polls),
                }));
                Ok(())
            }
        }
    }

    async fn delete_table(&self, name: &str) -> Result<bool> {
        Ok(self.tables.remove(name).is_some())
    }

    async fn describe_table(&self, name: &str) -> Result<Option<TableStatus>> {
        Ok(self.tables.get(name).map(|table| {
            let pending = table
                .pending_polls
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
            match pending {
                Ok(_) => TableStatus::Creating,
                Err(_) => TableStatus::Active,
            }
        }))
    }

    async fn enable_ttl(&self, name: &str, attribute: &str) -> Result<()> {
        let table = self.table(name)?;
        *table.ttl_attribute.write() = Some(attribute.to_string());
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}
