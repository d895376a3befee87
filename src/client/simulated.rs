//! Simulated table client with fault injection
//!
//! DST-compatible wrapper around any `TableClient`. Faults are drawn from a
//! seeded ChaCha RNG, so a failing run replays exactly from its seed.

use crate::client::{
    BatchGetItem, BatchWriteItem, ClientFactory, ClientOptions, PrimaryKey, ReservedThroughput,
    Row, RowExistence, ServiceError, TableClient, TableDescription, TableMeta, TableOptions,
    TableUpdate, SERVER_UNAVAILABLE,
};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Error code used for injected per-row failures
pub const SIMULATED_ROW_ERROR: &str = "OTSInternalServerError";

fn row_failure() -> ServiceError {
    ServiceError::new(SIMULATED_ROW_ERROR, "simulated row failure")
}

/// Configuration for simulated fault injection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedClientConfig {
    /// Probability that a whole request fails
    pub request_fail_prob: f64,
    /// Probability that a single row of a batch fails
    pub row_fail_prob: f64,
    /// Probability that a client construction fails
    pub connect_fail_prob: f64,
}

impl Default for SimulatedClientConfig {
    fn default() -> Self {
        SimulatedClientConfig {
            request_fail_prob: 0.01,
            row_fail_prob: 0.01,
            connect_fail_prob: 0.0,
        }
    }
}

impl SimulatedClientConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedClientConfig {
            request_fail_prob: 0.05,
            row_fail_prob: 0.05,
            connect_fail_prob: 0.1,
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedClientConfig {
            request_fail_prob: 0.0,
            row_fail_prob: 0.0,
            connect_fail_prob: 0.0,
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedClientStats {
    pub requests: u64,
    pub request_failures: u64,
    pub batch_rows: u64,
    pub row_failures: u64,
}

struct SimulatedState {
    rng: ChaCha8Rng,
    stats: SimulatedClientStats,
}

/// Client that wraps another client and injects faults
pub struct SimulatedTableClient<T: TableClient> {
    inner: T,
    config: SimulatedClientConfig,
    state: Arc<Mutex<SimulatedState>>,
}

impl<T: TableClient> SimulatedTableClient<T> {
    pub fn new(inner: T, seed: u64, config: SimulatedClientConfig) -> Self {
        SimulatedTableClient {
            inner,
            config,
            state: Arc::new(Mutex::new(SimulatedState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                stats: SimulatedClientStats::default(),
            })),
        }
    }

    pub fn stats(&self) -> SimulatedClientStats {
        self.state.lock().stats.clone()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Count the request and decide whether it fails as a whole
    fn request(&self, op: &str) -> Result<(), ServiceError> {
        let mut s = self.state.lock();
        s.stats.requests += 1;
        let prob = self.config.request_fail_prob.clamp(0.0, 1.0);
        if s.rng.gen_bool(prob) {
            s.stats.request_failures += 1;
            let message = format!("simulated {} failure", op);
            return Err(ServiceError::new(SERVER_UNAVAILABLE, message));
        }
        Ok(())
    }

    /// Replace successful batch items by injected row failures
    fn corrupt_items<V>(
        &self,
        items: Vec<Result<V, ServiceError>>,
    ) -> Vec<Result<V, ServiceError>> {
        let mut s = self.state.lock();
        let prob = self.config.row_fail_prob.clamp(0.0, 1.0);
        items
            .into_iter()
            .map(|item| {
                s.stats.batch_rows += 1;
                if item.is_ok() && s.rng.gen_bool(prob) {
                    s.stats.row_failures += 1;
                    Err(row_failure())
                } else {
                    item
                }
            })
            .collect()
    }
}

impl<T: TableClient> TableClient for SimulatedTableClient<T> {
    fn get_row(&self, table: &str, key: &PrimaryKey) -> Result<Option<Row>, ServiceError> {
        self.request("get_row")?;
        self.inner.get_row(table, key)
    }

    fn put_row(&self, table: &str, row: Row) -> Result<(), ServiceError> {
        self.request("put_row")?;
        self.inner.put_row(table, row)
    }

    fn delete_row(
        &self,
        table: &str,
        key: &PrimaryKey,
        condition: RowExistence,
    ) -> Result<(), ServiceError> {
        self.request("delete_row")?;
        self.inner.delete_row(table, key, condition)
    }

    fn batch_get_row(
        &self,
        table: &str,
        keys: &[PrimaryKey],
    ) -> Result<Vec<BatchGetItem>, ServiceError> {
        self.request("batch_get_row")?;
        let items = self.inner.batch_get_row(table, keys)?;
        Ok(self.corrupt_items(items))
    }

    fn batch_delete_row(
        &self,
        table: &str,
        keys: &[PrimaryKey],
        condition: RowExistence,
    ) -> Result<Vec<BatchWriteItem>, ServiceError> {
        self.request("batch_write_row")?;
        // Injected failures happen before the delete reaches the inner store
        let mut failed = Vec::with_capacity(keys.len());
        {
            let mut s = self.state.lock();
            let prob = self.config.row_fail_prob.clamp(0.0, 1.0);
            for _ in keys {
                s.stats.batch_rows += 1;
                let fail = s.rng.gen_bool(prob);
                if fail {
                    s.stats.row_failures += 1;
                }
                failed.push(fail);
            }
        }
        let passed: Vec<PrimaryKey> = keys
            .iter()
            .zip(&failed)
            .filter(|(_, fail)| !**fail)
            .map(|(key, _)| key.clone())
            .collect();
        let inner_items = self.inner.batch_delete_row(table, &passed, condition)?;
        let mut inner_items = inner_items.into_iter();

        let mut items = Vec::with_capacity(failed.len());
        for fail in failed {
            if fail {
                items.push(Err(row_failure()));
                continue;
            }
            match inner_items.next() {
                Some(item) => items.push(item),
                // A short inner response stays short
                None => break,
            }
        }
        Ok(items)
    }

    fn describe_table(&self, table: &str) -> Result<TableDescription, ServiceError> {
        self.inner.describe_table(table)
    }

    fn create_table(
        &self,
        meta: &TableMeta,
        options: TableOptions,
        throughput: ReservedThroughput,
    ) -> Result<(), ServiceError> {
        self.inner.create_table(meta, options, throughput)
    }

    fn update_table(&self, table: &str, update: TableUpdate) -> Result<(), ServiceError> {
        self.inner.update_table(table, update)
    }

    fn delete_table(&self, table: &str) -> Result<(), ServiceError> {
        self.inner.delete_table(table)
    }
}

/// Factory wrapping every client of `inner` in a `SimulatedTableClient`
pub struct SimulatedClientFactory<F: ClientFactory> {
    inner: F,
    seed: u64,
    config: SimulatedClientConfig,
    rng: Mutex<ChaCha8Rng>,
    stats: Mutex<Option<Arc<Mutex<SimulatedState>>>>,
}

impl<F: ClientFactory> SimulatedClientFactory<F> {
    pub fn new(inner: F, seed: u64, config: SimulatedClientConfig) -> Self {
        SimulatedClientFactory {
            inner,
            seed,
            config,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed ^ 0x5eed)),
            stats: Mutex::new(None),
        }
    }

    /// Statistics of the most recently constructed client
    pub fn stats(&self) -> Option<SimulatedClientStats> {
        self.stats
            .lock()
            .as_ref()
            .map(|state| state.lock().stats.clone())
    }
}

impl<F: ClientFactory> ClientFactory for SimulatedClientFactory<F> {
    type Client = SimulatedTableClient<F::Client>;

    fn connect(
        &self,
        instance: &str,
        options: &ClientOptions,
    ) -> Result<Self::Client, ServiceError> {
        let prob = self.config.connect_fail_prob.clamp(0.0, 1.0);
        if self.rng.lock().gen_bool(prob) {
            let message = "simulated connect failure";
            return Err(ServiceError::new(SERVER_UNAVAILABLE, message));
        }
        let inner = self.inner.connect(instance, options)?;
        let client = SimulatedTableClient::new(inner, self.seed, self.config.clone());
        *self.stats.lock() = Some(client.state.clone());
        Ok(client)
    }
}
