//! Table store backed key-value storage
//!
//! Point operations go through the row codec to single-row requests; bulk
//! operations are split into chunks no larger than the service accepts.
//!
//! Error policy:
//! - `get`, `get_many`, `set`, `delete`: service errors are logged and the
//!   call behaves as a miss or a no-op
//! - `delete_many`: every failed row is collected and returned, since a
//!   silent partial delete breaks cleanup
//! - precondition failures (TTL override, oversized value) are returned
//!   before any request is sent
//!
//! A batch response holding fewer items than keys requested counts as a
//! failure for every key left without a result.

use crate::client::{
    BatchGetItem, ClientFactory, PrimaryKey, PrimaryKeyType, RowExistence, TableClient,
    TableDescription, TableMeta, TableOptions, TableUpdate,
};
use crate::clock::{Clock, SystemClock};
use crate::config::KvStorageConfig;
use crate::kvstore::error::{BatchDeleteError, KvError, RowFailure};
use crate::kvstore::lazy_client::LazyClient;
use crate::kvstore::row::{self, RowCodec, ID_COLUMN};
use crate::kvstore::KvStorage;
use bytes::Bytes;
use std::collections::VecDeque;
use std::slice::Chunks;
use std::time::Duration;
use tracing::{debug, info, warn};

fn primary_keys<S: AsRef<str>>(keys: &[S]) -> Vec<PrimaryKey> {
    keys.iter()
        .map(|key| row::primary_key(key.as_ref()))
        .collect()
}

pub struct TablestoreKvStorage<F: ClientFactory, C: Clock = SystemClock> {
    config: KvStorageConfig,
    codec: RowCodec,
    client: LazyClient<F>,
    clock: C,
}

impl<F: ClientFactory> TablestoreKvStorage<F, SystemClock> {
    /// Fails when the configured compression strategy is unknown
    pub fn new(config: KvStorageConfig, factory: F) -> Result<Self, KvError> {
        Self::with_clock(config, factory, SystemClock)
    }
}

impl<F: ClientFactory, C: Clock> TablestoreKvStorage<F, C> {
    /// Storage judging row age against `clock`
    pub fn with_clock(config: KvStorageConfig, factory: F, clock: C) -> Result<Self, KvError> {
        let codec = RowCodec::new(config.compression.as_deref(), config.default_ttl)?;
        let options = config.client_options.clone();
        let client = LazyClient::new(factory, config.instance.clone(), options);
        Ok(TablestoreKvStorage {
            config,
            codec,
            client,
            clock,
        })
    }

    pub fn config(&self) -> &KvStorageConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        self.client.factory()
    }

    pub fn lazy_client(&self) -> &LazyClient<F> {
        &self.client
    }

    fn table(&self) -> &str {
        &self.config.table_name
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let client = match self.client.get() {
            Ok(client) => client,
            Err(e) => {
                debug!(key, error = %e, "Failed to get row");
                return None;
            }
        };
        match client.get_row(self.table(), &row::primary_key(key)) {
            Ok(Some(row)) => self.codec.decode(&row, &self.clock),
            Ok(None) => None,
            Err(e) => {
                debug!(key, error = %e, "Failed to get row");
                None
            }
        }
    }

    /// Lazily fetch `keys`, one batch request per chunk
    ///
    /// Only found, fresh and decodable rows are yielded; failures are logged
    /// and skipped.
    pub fn get_many<'a, S: AsRef<str>>(&'a self, keys: &'a [S]) -> GetMany<'a, F, C, S> {
        GetMany {
            storage: self,
            chunks: keys.chunks(self.config.batch.max_batch_get.max(1)),
            ready: VecDeque::new(),
            total: keys.len(),
            finished: 0,
            failed: 0,
        }
    }

    /// Store `value` under `key`
    ///
    /// `ttl` must be absent or equal to the configured default. Write
    /// failures are logged and swallowed.
    pub fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        if let Some(requested) = ttl {
            if Some(requested) != self.config.default_ttl {
                return Err(KvError::UnsupportedTtl {
                    requested,
                    default: self.config.default_ttl,
                });
            }
        }

        let row = self.codec.encode(key, value)?;

        let result = self
            .client
            .get()
            .and_then(|client| client.put_row(self.table(), row));
        if let Err(e) = result {
            warn!(key, error = %e, "Failed to set row");
        }
        Ok(())
    }

    /// Best-effort delete; failures are logged
    pub fn delete(&self, key: &str) {
        let pk = row::primary_key(key);
        let result = self
            .client
            .get()
            .and_then(|client| client.delete_row(self.table(), &pk, RowExistence::Ignore));
        match result {
            Ok(()) => debug!(key, "Row has been deleted"),
            Err(e) => warn!(key, error = %e, "Failed to delete row"),
        }
    }

    /// Delete `keys` in chunks, reporting every row that failed
    ///
    /// Rows deleted before a failure stay deleted.
    pub fn delete_many<S: AsRef<str>>(&self, keys: &[S]) -> Result<(), KvError> {
        let client = self.client.get()?;
        let mut failures = Vec::new();
        let mut finished = 0;

        for chunk in keys.chunks(self.config.batch.max_batch_write.max(1)) {
            let pks = primary_keys(chunk);
            match client.batch_delete_row(self.table(), &pks, RowExistence::Ignore) {
                Ok(items) => {
                    let returned = items.len();
                    for (key, item) in chunk.iter().zip(items) {
                        if let Err(e) = item {
                            failures.push(RowFailure::new(key.as_ref(), &e));
                        }
                    }
                    if returned < chunk.len() {
                        warn!(
                            rows = chunk.len(),
                            returned,
                            "Batch delete response is missing rows"
                        );
                        for key in &chunk[returned..] {
                            failures.push(RowFailure::missing_result(key.as_ref()));
                        }
                    }
                }
                Err(e) => {
                    warn!(rows = chunk.len(), error = %e, "Batch delete request failed");
                    for key in chunk {
                        failures.push(RowFailure::new(key.as_ref(), &e));
                    }
                }
            }
            finished += chunk.len();
            debug!(
                total = keys.len(),
                finished,
                failed = failures.len(),
                "Batch deleting rows"
            );
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(KvError::BatchDelete(BatchDeleteError { failures }))
        }
    }

    fn describe_or_none(&self, client: &F::Client) -> Option<TableDescription> {
        match client.describe_table(self.table()) {
            Ok(description) => Some(description),
            Err(e) => {
                debug!(table = self.table(), error = %e, "Failed to describe table");
                None
            }
        }
    }

    /// Create the table, or reconcile its options with the configuration
    ///
    /// `automatic_expiry` only decides the table's own time-to-live; reads
    /// check the default TTL either way. A mismatched primary key is only
    /// reported: changing it would destroy the table.
    pub fn bootstrap(&self, automatic_expiry: bool) -> Result<(), KvError> {
        let client = self.client.get()?;
        let table = self.table();
        let existing = self.describe_or_none(client);

        let meta = TableMeta {
            table_name: table.to_string(),
            schema_of_primary_key: vec![(ID_COLUMN.to_string(), PrimaryKeyType::String)],
        };
        let time_to_live = match (automatic_expiry, self.config.default_ttl) {
            (true, Some(ttl)) => i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
            (true, None) => {
                warn!(table, "Automatic expiry requested without a default TTL");
                -1
            }
            (false, _) => -1,
        };
        let options = TableOptions {
            time_to_live,
            max_versions: 1,
        };
        let throughput = self.config.reserved_throughput;

        match existing {
            None => {
                client.create_table(&meta, options, throughput)?;
                info!(table, time_to_live, "Table has been created");
            }
            Some(actual) => {
                if actual.table_meta.primary_key_map() != meta.primary_key_map() {
                    warn!(
                        table,
                        actual = ?actual.table_meta.schema_of_primary_key,
                        "Table already exists but the primary key schema mismatched"
                    );
                }
                if actual.table_options != options {
                    client.update_table(table, TableUpdate::Options(options))?;
                    info!(table, time_to_live, "Table options have been updated");
                }
                if actual.reserved_throughput != throughput {
                    let update = TableUpdate::Throughput(throughput);
                    client.update_table(table, update)?;
                    info!(
                        table,
                        read = throughput.read,
                        write = throughput.write,
                        "Table reserved throughput has been updated"
                    );
                }
            }
        }
        Ok(())
    }

    /// Delete the table; a missing table is only reported
    pub fn destroy(&self) -> Result<(), KvError> {
        let client = self.client.get()?;
        let table = self.table();
        if self.describe_or_none(client).is_none() {
            warn!(table, "Table does not exist, skip deleting");
            return Ok(());
        }

        debug!(table, "Deleting table");
        client.delete_table(table)?;
        info!(table, "Table has been deleted");
        Ok(())
    }
}

impl<F: ClientFactory, C: Clock> std::fmt::Debug for TablestoreKvStorage<F, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TablestoreKvStorage")
            .field("table", &self.config.table_name)
            .field("codec", &self.codec)
            .field("client", &self.client)
            .finish()
    }
}

/// Iterator returned by `TablestoreKvStorage::get_many`
///
/// The next chunk is requested only once the rows of the previous one have
/// been consumed.
pub struct GetMany<'a, F: ClientFactory, C: Clock, S: AsRef<str>> {
    storage: &'a TablestoreKvStorage<F, C>,
    chunks: Chunks<'a, S>,
    ready: VecDeque<(String, Bytes)>,
    total: usize,
    finished: usize,
    failed: usize,
}

impl<'a, F: ClientFactory, C: Clock, S: AsRef<str>> GetMany<'a, F, C, S> {
    fn fetch(&mut self, chunk: &[S]) {
        let storage = self.storage;
        let pks = primary_keys(chunk);
        let response = storage
            .client
            .get()
            .and_then(|client| client.batch_get_row(storage.table(), &pks));

        match response {
            Ok(items) => {
                let returned = items.len();
                for (key, item) in chunk.iter().zip(items) {
                    self.accept(key.as_ref(), item);
                }
                for key in chunk.iter().skip(returned) {
                    let key = key.as_ref();
                    debug!(key, "Batch get response holds no result for row");
                    self.failed += 1;
                }
            }
            Err(e) => {
                debug!(rows = chunk.len(), error = %e, "Batch get request failed");
                self.failed += chunk.len();
            }
        }

        self.finished += chunk.len();
        debug!(
            total = self.total,
            finished = self.finished,
            failed = self.failed,
            "Batch getting rows"
        );
    }

    fn accept(&mut self, key: &str, item: BatchGetItem) {
        let storage = self.storage;
        match item {
            Ok(Some(row)) => {
                if let Some(value) = storage.codec.decode(&row, &storage.clock) {
                    self.ready.push_back((key.to_string(), value));
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!(key, code = %e.code, message = %e.message, "Failed to get row");
                self.failed += 1;
            }
        }
    }
}

impl<'a, F: ClientFactory, C: Clock, S: AsRef<str>> Iterator for GetMany<'a, F, C, S> {
    type Item = (String, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            let chunk = self.chunks.next()?;
            self.fetch(chunk);
        }
    }
}

impl<F: ClientFactory, C: Clock> KvStorage for TablestoreKvStorage<F, C> {
    fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        Ok(TablestoreKvStorage::get(self, key))
    }

    fn get_many<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Box<dyn Iterator<Item = (String, Bytes)> + 'a> {
        Box::new(TablestoreKvStorage::get_many(self, keys))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        TablestoreKvStorage::set(self, key, value, ttl)
    }

    fn delete(&self, key: &str) -> Result<(), KvError> {
        TablestoreKvStorage::delete(self, key);
        Ok(())
    }

    fn delete_many(&self, keys: &[String]) -> Result<(), KvError> {
        TablestoreKvStorage::delete_many(self, keys)
    }

    fn bootstrap(&self, automatic_expiry: bool) -> Result<(), KvError> {
        TablestoreKvStorage::bootstrap(self, automatic_expiry)
    }

    fn destroy(&self) -> Result<(), KvError> {
        TablestoreKvStorage::destroy(self)
    }
}
