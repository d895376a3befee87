//! In-memory table service
//!
//! Behaves like the remote table store closely enough to exercise the
//! key-value layer: it enforces batch and cell size limits, stamps writes
//! with the time of its clock, applies server-side expiry when a table has a
//! positive time-to-live, and records every request it receives.
//!
//! Tests can inject per-row errors, shorten batch responses or take the
//! whole service offline.

use crate::client::{
    BatchGetItem, BatchWriteItem, ClientFactory, ClientOptions, ColumnValue, PrimaryKey,
    ReservedThroughput, Row, RowExistence, ServiceError, TableClient, TableDescription, TableMeta,
    TableOptions, TableUpdate, OBJECT_ALREADY_EXIST, OBJECT_NOT_EXIST, PARAMETER_INVALID,
    SERVER_UNAVAILABLE,
};
use crate::clock::{Clock, SystemClock};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rows per batch-get request accepted by the service
pub const SERVICE_MAX_BATCH_GET: usize = 100;
/// Rows per batch-write request accepted by the service
pub const SERVICE_MAX_BATCH_WRITE: usize = 200;
/// Largest cell value accepted by the service
pub const SERVICE_MAX_CELL_SIZE: usize = 2 * 1024 * 1024;

/// A request received by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestRecord {
    GetRow { table: String },
    PutRow { table: String },
    DeleteRow { table: String },
    BatchGetRow { table: String, rows: usize },
    BatchWriteRow { table: String, rows: usize },
    DescribeTable { table: String },
    CreateTable { table: String },
    UpdateTable { table: String, update: TableUpdate },
    DeleteTable { table: String },
}

#[derive(Debug, Clone)]
struct StoredRow {
    columns: Vec<(String, ColumnValue)>,
    written_at_ms: u64,
}

#[derive(Debug)]
struct Table {
    description: TableDescription,
    rows: HashMap<PrimaryKey, StoredRow>,
}

#[derive(Debug, Default)]
struct ServiceState {
    tables: HashMap<String, Table>,
    requests: Vec<RequestRecord>,
    /// Errors returned for any operation touching the row with this `id`
    row_errors: HashMap<String, ServiceError>,
    /// Rows served per batch request; the rest are neither processed nor reported
    batch_response_limit: Option<usize>,
    unavailable: bool,
}

fn table_missing(table: &str) -> ServiceError {
    let message = format!("Requested table does not exist: {}", table);
    ServiceError::new(OBJECT_NOT_EXIST, message)
}

fn too_many_rows(limit: usize) -> ServiceError {
    let message = format!("Rows count exceeds the upper limit: {}", limit);
    ServiceError::new(PARAMETER_INVALID, message)
}

fn condition_failed() -> ServiceError {
    ServiceError::new("OTSConditionCheckFail", "Condition check failed.")
}

/// Shared in-memory table service; clones share state
#[derive(Debug, Clone)]
pub struct InMemoryTableService<C: Clock = SystemClock> {
    state: Arc<RwLock<ServiceState>>,
    clock: C,
    connections: Arc<AtomicUsize>,
    connect_delay: Duration,
}

impl InMemoryTableService<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryTableService<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryTableService<C> {
    /// Create a service whose writes are stamped by `clock`
    pub fn with_clock(clock: C) -> Self {
        InMemoryTableService {
            state: Arc::new(RwLock::new(ServiceState::default())),
            clock,
            connections: Arc::new(AtomicUsize::new(0)),
            connect_delay: Duration::ZERO,
        }
    }

    /// Delay every new connection (widens races in concurrency tests)
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Open a client handle onto this service
    pub fn client(&self) -> InMemoryTableClient<C> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        InMemoryTableClient {
            service: self.clone(),
        }
    }

    /// Factory producing handles onto this service
    pub fn factory(&self) -> InMemoryClientFactory<C> {
        InMemoryClientFactory {
            service: self.clone(),
        }
    }

    /// Number of client handles opened so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// All requests received, oldest first
    pub fn requests(&self) -> Vec<RequestRecord> {
        self.state.read().requests.clone()
    }

    /// Sizes of the batch-get requests received, in order
    pub fn batch_get_sizes(&self) -> Vec<usize> {
        self.state
            .read()
            .requests
            .iter()
            .filter_map(|r| match r {
                RequestRecord::BatchGetRow { rows, .. } => Some(*rows),
                _ => None,
            })
            .collect()
    }

    /// Sizes of the batch-write requests received, in order
    pub fn batch_write_sizes(&self) -> Vec<usize> {
        self.state
            .read()
            .requests
            .iter()
            .filter_map(|r| match r {
                RequestRecord::BatchWriteRow { rows, .. } => Some(*rows),
                _ => None,
            })
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state.write().requests.clear();
    }

    /// Fail every operation touching the row whose `id` is `key`
    pub fn inject_row_error(&self, key: &str, error: ServiceError) {
        let mut state = self.state.write();
        state.row_errors.insert(key.to_string(), error);
    }

    pub fn clear_row_errors(&self) {
        self.state.write().row_errors.clear();
    }

    /// Serve only the first `rows` rows of every batch request
    ///
    /// The response then holds fewer items than keys requested. `None`
    /// restores complete responses.
    pub fn truncate_batch_responses(&self, rows: Option<usize>) {
        self.state.write().batch_response_limit = rows;
    }

    /// Reject every request while `unavailable` is set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Write a row directly, bypassing the request path
    pub fn insert_raw(&self, table: &str, row: Row, written_at_ms: u64) {
        let mut state = self.state.write();
        if let Some(t) = state.tables.get_mut(table) {
            t.rows.insert(
                row.primary_key,
                StoredRow {
                    columns: row.attribute_columns,
                    written_at_ms,
                },
            );
        }
    }

    /// Number of rows physically stored in `table`
    pub fn row_count(&self, table: &str) -> usize {
        self.state
            .read()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.read().tables.contains_key(table)
    }

    /// Record the request and check service availability
    fn admit(&self, state: &mut ServiceState, record: RequestRecord) -> Result<(), ServiceError> {
        state.requests.push(record);
        if state.unavailable {
            return Err(ServiceError::new(SERVER_UNAVAILABLE, "Server unavailable"));
        }
        Ok(())
    }

    fn row_error(state: &ServiceState, key: &PrimaryKey) -> Option<ServiceError> {
        key.0
            .iter()
            .find_map(|(_, value)| state.row_errors.get(value).cloned())
    }

    /// Keys of a batch request the service actually serves
    fn served<'k>(state: &ServiceState, keys: &'k [PrimaryKey]) -> &'k [PrimaryKey] {
        match state.batch_response_limit {
            Some(limit) if limit < keys.len() => &keys[..limit],
            _ => keys,
        }
    }

    fn table<'a>(state: &'a ServiceState, table: &str) -> Result<&'a Table, ServiceError> {
        state.tables.get(table).ok_or_else(|| table_missing(table))
    }

    fn table_mut<'a>(
        state: &'a mut ServiceState,
        table: &str,
    ) -> Result<&'a mut Table, ServiceError> {
        state
            .tables
            .get_mut(table)
            .ok_or_else(|| table_missing(table))
    }

    /// Read a row honouring server-side expiry
    fn read_row(&self, table: &Table, key: &PrimaryKey) -> Option<Row> {
        let stored = table.rows.get(key)?;
        let ttl = table.description.table_options.time_to_live;
        if ttl > 0 {
            let ttl = Duration::from_secs(ttl.unsigned_abs());
            if self.clock.is_expired(stored.written_at_ms, ttl) {
                return None;
            }
        }
        Some(Row {
            primary_key: key.clone(),
            attribute_columns: stored.columns.clone(),
            written_at_ms: Some(stored.written_at_ms),
        })
    }
}

/// Client handle onto an `InMemoryTableService`
#[derive(Debug, Clone)]
pub struct InMemoryTableClient<C: Clock = SystemClock> {
    service: InMemoryTableService<C>,
}

impl<C: Clock> InMemoryTableClient<C> {
    pub fn service(&self) -> &InMemoryTableService<C> {
        &self.service
    }
}

impl<C: Clock> TableClient for InMemoryTableClient<C> {
    fn get_row(&self, table: &str, key: &PrimaryKey) -> Result<Option<Row>, ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        let record = RequestRecord::GetRow {
            table: table.to_string(),
        };
        svc.admit(&mut state, record)?;
        if let Some(err) = InMemoryTableService::<C>::row_error(&state, key) {
            return Err(err);
        }
        let t = InMemoryTableService::<C>::table(&state, table)?;
        Ok(svc.read_row(t, key))
    }

    fn put_row(&self, table: &str, row: Row) -> Result<(), ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        let record = RequestRecord::PutRow {
            table: table.to_string(),
        };
        svc.admit(&mut state, record)?;
        if let Some(err) = InMemoryTableService::<C>::row_error(&state, &row.primary_key) {
            return Err(err);
        }
        for (name, value) in &row.attribute_columns {
            if let ColumnValue::Binary(data) = value {
                if data.len() > SERVICE_MAX_CELL_SIZE {
                    let message = format!(
                        "The length of attribute column: '{}' exceeds the MaxLength",
                        name
                    );
                    return Err(ServiceError::new(PARAMETER_INVALID, message));
                }
            }
        }
        let now = svc.clock.now_ms();
        let t = InMemoryTableService::<C>::table_mut(&mut state, table)?;
        t.rows.insert(
            row.primary_key,
            StoredRow {
                columns: row.attribute_columns,
                written_at_ms: now,
            },
        );
        Ok(())
    }

    fn delete_row(
        &self,
        table: &str,
        key: &PrimaryKey,
        condition: RowExistence,
    ) -> Result<(), ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        let record = RequestRecord::DeleteRow {
            table: table.to_string(),
        };
        svc.admit(&mut state, record)?;
        if let Some(err) = InMemoryTableService::<C>::row_error(&state, key) {
            return Err(err);
        }
        let t = InMemoryTableService::<C>::table_mut(&mut state, table)?;
        delete_stored(t, key, condition)
    }

    fn batch_get_row(
        &self,
        table: &str,
        keys: &[PrimaryKey],
    ) -> Result<Vec<BatchGetItem>, ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        svc.admit(
            &mut state,
            RequestRecord::BatchGetRow {
                table: table.to_string(),
                rows: keys.len(),
            },
        )?;
        if keys.len() > SERVICE_MAX_BATCH_GET {
            return Err(too_many_rows(SERVICE_MAX_BATCH_GET));
        }
        let keys = InMemoryTableService::<C>::served(&state, keys);
        let t = InMemoryTableService::<C>::table(&state, table)?;
        Ok(keys
            .iter()
            .map(|key| match InMemoryTableService::<C>::row_error(&state, key) {
                Some(err) => Err(err),
                None => Ok(svc.read_row(t, key)),
            })
            .collect())
    }

    fn batch_delete_row(
        &self,
        table: &str,
        keys: &[PrimaryKey],
        condition: RowExistence,
    ) -> Result<Vec<BatchWriteItem>, ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        svc.admit(
            &mut state,
            RequestRecord::BatchWriteRow {
                table: table.to_string(),
                rows: keys.len(),
            },
        )?;
        if keys.len() > SERVICE_MAX_BATCH_WRITE {
            return Err(too_many_rows(SERVICE_MAX_BATCH_WRITE));
        }
        let keys = InMemoryTableService::<C>::served(&state, keys);
        let errors: Vec<Option<ServiceError>> = keys
            .iter()
            .map(|key| InMemoryTableService::<C>::row_error(&state, key))
            .collect();
        let t = InMemoryTableService::<C>::table_mut(&mut state, table)?;
        Ok(keys
            .iter()
            .zip(errors)
            .map(|(key, err)| match err {
                Some(err) => Err(err),
                None => delete_stored(t, key, condition),
            })
            .collect())
    }

    fn describe_table(&self, table: &str) -> Result<TableDescription, ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        let record = RequestRecord::DescribeTable {
            table: table.to_string(),
        };
        svc.admit(&mut state, record)?;
        let t = InMemoryTableService::<C>::table(&state, table)?;
        Ok(t.description.clone())
    }

    fn create_table(
        &self,
        meta: &TableMeta,
        options: TableOptions,
        throughput: ReservedThroughput,
    ) -> Result<(), ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        svc.admit(
            &mut state,
            RequestRecord::CreateTable {
                table: meta.table_name.clone(),
            },
        )?;
        if state.tables.contains_key(&meta.table_name) {
            return Err(ServiceError::new(
                OBJECT_ALREADY_EXIST,
                format!("Requested table already exists: {}", meta.table_name),
            ));
        }
        state.tables.insert(
            meta.table_name.clone(),
            Table {
                description: TableDescription {
                    table_meta: meta.clone(),
                    table_options: options,
                    reserved_throughput: throughput,
                },
                rows: HashMap::new(),
            },
        );
        Ok(())
    }

    fn update_table(&self, table: &str, update: TableUpdate) -> Result<(), ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        svc.admit(
            &mut state,
            RequestRecord::UpdateTable {
                table: table.to_string(),
                update,
            },
        )?;
        let t = InMemoryTableService::<C>::table_mut(&mut state, table)?;
        match update {
            TableUpdate::Options(options) => t.description.table_options = options,
            TableUpdate::Throughput(throughput) => t.description.reserved_throughput = throughput,
        }
        Ok(())
    }

    fn delete_table(&self, table: &str) -> Result<(), ServiceError> {
        let svc = &self.service;
        let mut state = svc.state.write();
        let record = RequestRecord::DeleteTable {
            table: table.to_string(),
        };
        svc.admit(&mut state, record)?;
        state
            .tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| table_missing(table))
    }
}

fn delete_stored(
    table: &mut Table,
    key: &PrimaryKey,
    condition: RowExistence,
) -> Result<(), ServiceError> {
    let existed = table.rows.contains_key(key);
    match condition {
        RowExistence::ExpectExist if !existed => return Err(condition_failed()),
        RowExistence::ExpectNotExist if existed => return Err(condition_failed()),
        _ => {}
    }
    table.rows.remove(key);
    Ok(())
}

/// Factory connecting to an `InMemoryTableService`
#[derive(Debug, Clone)]
pub struct InMemoryClientFactory<C: Clock = SystemClock> {
    service: InMemoryTableService<C>,
}

impl<C: Clock> ClientFactory for InMemoryClientFactory<C> {
    type Client = InMemoryTableClient<C>;

    fn connect(
        &self,
        instance: &str,
        options: &ClientOptions,
    ) -> Result<Self::Client, ServiceError> {
        if !self.service.connect_delay.is_zero() {
            std::thread::sleep(self.service.connect_delay);
        }
        let endpoint = options.get("endpoint").and_then(toml::Value::as_str);
        tracing::debug!(
            instance,
            endpoint = endpoint.unwrap_or("memory"),
            "Connecting to in-memory table service"
        );
        Ok(self.service.client())
    }
}
