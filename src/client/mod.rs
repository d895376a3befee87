//! Table Store Client Abstraction
//!
//! Describes the remote wide-column table service as a trait so the
//! key-value layer can be driven by any transport.
//!
//! Implementations:
//! - `InMemoryTableClient`: For development, unit tests and DST
//! - `SimulatedTableClient`: Wraps another client and injects faults
//!
//! All calls are blocking. Transport-level timeout and retry policy belong
//! to the implementation, not to the callers of this trait.

pub mod memory;
pub mod simulated;

pub use memory::{InMemoryClientFactory, InMemoryTableClient, InMemoryTableService, RequestRecord};
pub use simulated::{
    SimulatedClientConfig, SimulatedClientFactory, SimulatedClientStats, SimulatedTableClient,
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error code returned when a table does not exist.
pub const OBJECT_NOT_EXIST: &str = "OTSObjectNotExist";
/// Error code returned when a table already exists.
pub const OBJECT_ALREADY_EXIST: &str = "OTSObjectAlreadyExist";
/// Error code returned for malformed or oversized requests.
pub const PARAMETER_INVALID: &str = "OTSParameterInvalid";
/// Error code returned when the service cannot be reached or is overloaded.
pub const SERVER_UNAVAILABLE: &str = "OTSServerUnavailable";

/// Error reported by the remote table service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    /// Service error code (e.g. `OTSObjectNotExist`)
    pub code: String,
    /// Human readable message
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServiceError {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == OBJECT_NOT_EXIST
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ErrorCode: {}, ErrorMessage: {}",
            self.code, self.message
        )
    }
}

impl std::error::Error for ServiceError {}

/// Type of a primary key column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryKeyType {
    String,
    Integer,
    Binary,
}

/// Primary key of a row: ordered `(column, value)` pairs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimaryKey(pub Vec<(String, String)>);

impl PrimaryKey {
    /// Single-column key
    pub fn single(column: &str, value: &str) -> Self {
        PrimaryKey(vec![(column.to_string(), value.to_string())])
    }
}

/// Value held by an attribute column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Binary(Bytes),
    Integer(i64),
    String(String),
}

/// A row as sent to or returned by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub primary_key: PrimaryKey,
    pub attribute_columns: Vec<(String, ColumnValue)>,
    /// Write timestamp (Unix ms) assigned by the service, present on reads
    pub written_at_ms: Option<u64>,
}

impl Row {
    pub fn new(primary_key: PrimaryKey, attribute_columns: Vec<(String, ColumnValue)>) -> Self {
        Row {
            primary_key,
            attribute_columns,
            written_at_ms: None,
        }
    }

    /// Look up an attribute column by name
    pub fn column(&self, name: &str) -> Option<&ColumnValue> {
        self.attribute_columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }
}

/// Expectation on row existence for conditional writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowExistence {
    #[default]
    Ignore,
    ExpectExist,
    ExpectNotExist,
}

/// Reserved read/write capacity units of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReservedThroughput {
    pub read: u32,
    pub write: u32,
}

impl ReservedThroughput {
    pub fn new(read: u32, write: u32) -> Self {
        ReservedThroughput { read, write }
    }
}

/// Table options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// Server-side expiry in seconds, `-1` disables it
    pub time_to_live: i64,
    /// Number of versions kept per column
    pub max_versions: u32,
}

impl Default for TableOptions {
    fn default() -> Self {
        TableOptions {
            time_to_live: -1,
            max_versions: 1,
        }
    }
}

/// Table name and primary key schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    pub table_name: String,
    pub schema_of_primary_key: Vec<(String, PrimaryKeyType)>,
}

impl TableMeta {
    /// Primary key schema keyed by column name, for order-insensitive comparison
    pub fn primary_key_map(&self) -> BTreeMap<&str, PrimaryKeyType> {
        self.schema_of_primary_key
            .iter()
            .map(|(name, key_type)| (name.as_str(), *key_type))
            .collect()
    }
}

/// Result of a describe-table call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub table_meta: TableMeta,
    pub table_options: TableOptions,
    pub reserved_throughput: ReservedThroughput,
}

/// In-place table modification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableUpdate {
    Options(TableOptions),
    Throughput(ReservedThroughput),
}

/// Per-row outcome of a batch get, `Ok(None)` when the row does not exist
pub type BatchGetItem = Result<Option<Row>, ServiceError>;

/// Per-row outcome of a batch write
pub type BatchWriteItem = Result<(), ServiceError>;

/// Remote table service abstraction
///
/// Batch calls return exactly one item per requested key, in request order.
pub trait TableClient: Send + Sync + 'static {
    /// Read a single row
    fn get_row(&self, table: &str, key: &PrimaryKey) -> Result<Option<Row>, ServiceError>;

    /// Create or overwrite a single row
    fn put_row(&self, table: &str, row: Row) -> Result<(), ServiceError>;

    /// Delete a single row
    fn delete_row(
        &self,
        table: &str,
        key: &PrimaryKey,
        condition: RowExistence,
    ) -> Result<(), ServiceError>;

    /// Read many rows in one request
    fn batch_get_row(
        &self,
        table: &str,
        keys: &[PrimaryKey],
    ) -> Result<Vec<BatchGetItem>, ServiceError>;

    /// Delete many rows in one request
    fn batch_delete_row(
        &self,
        table: &str,
        keys: &[PrimaryKey],
        condition: RowExistence,
    ) -> Result<Vec<BatchWriteItem>, ServiceError>;

    /// Describe a table, `OTSObjectNotExist` when absent
    fn describe_table(&self, table: &str) -> Result<TableDescription, ServiceError>;

    fn create_table(
        &self,
        meta: &TableMeta,
        options: TableOptions,
        throughput: ReservedThroughput,
    ) -> Result<(), ServiceError>;

    fn update_table(&self, table: &str, update: TableUpdate) -> Result<(), ServiceError>;

    fn delete_table(&self, table: &str) -> Result<(), ServiceError>;
}

/// Opaque connection options passed through to the client constructor
///
/// Values keep their configured type, so timeouts and flags stay numeric
/// or boolean.
pub type ClientOptions = BTreeMap<String, toml::Value>;

/// Constructs clients for a service instance
pub trait ClientFactory: Send + Sync + 'static {
    type Client: TableClient;

    /// Connect to `instance`; called at most once per successful adapter
    fn connect(
        &self,
        instance: &str,
        options: &ClientOptions,
    ) -> Result<Self::Client, ServiceError>;
}
