//! Table provisioning.
//!
//! Runs once at startup, never on the request path. `ensure_*` creates
//! missing tables and leaves existing ones alone; `recreate_*` drops and
//! recreates them, discarding all rows.

use super::schema::{self, TableSchema, TableStatus};
use super::StoreClient;
use crate::core::config::{StoreConfig, TablesConfig};
use crate::core::{Result, TraceKvError};
use std::time::Duration;
use tokio::time::{sleep, Instant};

const POLL_ATTEMPTS: u32 = 30;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const STATUS_INTERVAL: Duration = Duration::from_millis(500);

/// Waits until the store answers a `list_tables` call, trying up to 30
/// times two seconds apart.
pub async fn poll_until_ready<S: StoreClient + ?Sized>(store: &S) -> Result<()> {
    let mut last_error = None;
    for attempt in 1..=POLL_ATTEMPTS {
        match store.list_tables().await {
            Ok(_) => return Ok(()),
            Err(e) => {
                tracing::debug!("Store not ready (attempt {}/{}): {}", attempt, POLL_ATTEMPTS, e);
                last_error = Some(e);
            }
        }
        if attempt < POLL_ATTEMPTS {
            sleep(POLL_INTERVAL).await;
        }
    }
    Err(last_error
        .unwrap_or_else(|| TraceKvError::store("store never became ready"))
        .context("store did not become ready"))
}

async fn wait_for_status<S, F>(store: &S, name: &str, timeout: Duration, done: F) -> Result<()>
where
    S: StoreClient + ?Sized,
    F: Fn(Option<TableStatus>) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if done(store.describe_table(name).await?) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(TraceKvError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .context(format!("waiting for table {}", name)));
        }
        sleep(STATUS_INTERVAL).await;
    }
}

async fn create_and_activate<S: StoreClient + ?Sized>(
    store: &S,
    table: &TableSchema,
    timeout: Duration,
) -> Result<()> {
    store
        .create_table(table)
        .await
        .map_err(|e| e.context(format!("failed to create table {}", table.name)))?;
    wait_for_status(store, &table.name, timeout, |s| s == Some(TableStatus::Active)).await?;
    if let Some(attribute) = &table.ttl_attribute {
        store
            .enable_ttl(&table.name, attribute)
            .await
            .map_err(|e| e.context(format!("failed updating ttl on {}", table.name)))?;
    }
    tracing::info!("Table {} is active", table.name);
    Ok(())
}

/// Creates the table when it does not exist and waits until it is active.
pub async fn ensure_table<S: StoreClient + ?Sized>(
    store: &S,
    table: &TableSchema,
    timeout: Duration,
) -> Result<()> {
    match store.describe_table(&table.name).await? {
        Some(_) => {
            tracing::debug!("Table {} already exists", table.name);
            wait_for_status(store, &table.name, timeout, |s| s == Some(TableStatus::Active)).await
        }
        None => create_and_activate(store, table, timeout).await,
    }
}

/// Drops the table if present, then creates it.
pub async fn recreate_table<S: StoreClient + ?Sized>(
    store: &S,
    table: &TableSchema,
    timeout: Duration,
) -> Result<()> {
    if store.delete_table(&table.name).await? {
        tracing::warn!("Dropped table {} and all of its rows", table.name);
        wait_for_status(store, &table.name, timeout, |s| s.is_none()).await?;
    }
    create_and_activate(store, table, timeout).await
}

fn span_store_tables(tables: &TablesConfig) -> [TableSchema; 3] {
    [
        schema::spans_table(&tables.spans),
        schema::services_table(&tables.services),
        schema::operations_table(&tables.operations),
    ]
}

/// Ensures the span, service and operation tables, concurrently.
pub async fn ensure_span_store_tables<S: StoreClient + ?Sized>(
    store: &S,
    tables: &TablesConfig,
    timeout: Duration,
) -> Result<()> {
    let [spans, services, operations] = span_store_tables(tables);
    tokio::try_join!(
        ensure_table(store, &spans, timeout),
        ensure_table(store, &services, timeout),
        ensure_table(store, &operations, timeout),
    )?;
    Ok(())
}

/// Recreates the span, service and operation tables, concurrently.
pub async fn recreate_span_store_tables<S: StoreClient + ?Sized>(
    store: &S,
    tables: &TablesConfig,
    timeout: Duration,
) -> Result<()> {
    let [spans, services, operations] = span_store_tables(tables);
    tokio::try_join!(
        recreate_table(store, &spans, timeout),
        recreate_table(store, &services, timeout),
        recreate_table(store, &operations, timeout),
    )?;
    Ok(())
}

pub async fn ensure_dependency_store_tables<S: StoreClient + ?Sized>(
    store: &S,
    tables: &TablesConfig,
    timeout: Duration,
) -> Result<()> {
    ensure_table(store, &schema::dependencies_table(&tables.dependencies), timeout).await
}

pub async fn recreate_dependency_store_tables<S: StoreClient + ?Sized>(
    store: &S,
    tables: &TablesConfig,
    timeout: Duration,
) -> Result<()> {
    recreate_table(store, &schema::dependencies_table(&tables.dependencies), timeout).await
}

/// Prepares all four tables as the store configuration asks.
pub async fn provision<S: StoreClient + ?Sized>(
    store: &S,
    tables: &TablesConfig,
    config: &StoreConfig,
) -> Result<()> {
    let timeout = config.table_ready_timeout;
    if config.recreate_tables {
        poll_until_ready(store).await?;
        tokio::try_join!(
            recreate_span_store_tables(store, tables, timeout),
            recreate_dependency_store_tables(store, tables, timeout),
        )?;
    } else if config.ensure_tables {
        poll_until_ready(store).await?;
        tokio::try_join!(
            ensure_span_store_tables(store, tables, timeout),
            ensure_dependency_store_tables(store, tables, timeout),
        )?;
    }
    Ok(())
}
