//! Deterministic Simulation Testing for the Key-Value Storage
//!
//! Shadow-state harness driving `TablestoreKvStorage` against the in-memory
//! service behind a fault-injecting client:
//! - Deterministic random workload generation
//! - Fault injection at the table client layer
//! - Invariant checking after every read
//! - Seed-based reproducibility for debugging
//!
//! ```text
//! for seed in 0..1000 {
//!     let mut harness = KvDSTHarness::new(KvDSTConfig::moderate(seed));
//!     harness.run(500);
//!     harness.check_invariants();
//! }
//! ```
//!
//! Without faults the shadow state is exact and every read must match it.
//! With faults a write may be silently lost, so reads are only checked
//! against the history of values ever written to the key.

use crate::client::{
    InMemoryClientFactory, InMemoryTableService, SimulatedClientConfig, SimulatedClientFactory,
    SimulatedClientStats,
};
use crate::clock::{Clock, SimulatedClock};
use crate::config::KvStorageConfig;
use crate::kvstore::{KvError, TablestoreKvStorage};
use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

const START_MS: u64 = 1_700_000_000_000;

/// Configuration for key-value DST
#[derive(Debug, Clone)]
pub struct KvDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Table client fault configuration
    pub client_config: SimulatedClientConfig,
    /// Compression strategy name
    pub compression: Option<String>,
    /// Default TTL, checked on every read
    pub default_ttl: Option<Duration>,
    /// Number of distinct keys
    pub key_space: u64,
    /// Largest value written
    pub max_value_len: usize,
    /// Largest key list in a bulk operation
    pub max_bulk_keys: usize,
}

impl Default for KvDSTConfig {
    fn default() -> Self {
        KvDSTConfig {
            seed: 0,
            client_config: SimulatedClientConfig::default(),
            compression: Some("zstd".to_string()),
            default_ttl: Some(Duration::from_secs(600)),
            key_space: 200,
            max_value_len: 4096,
            max_bulk_keys: 250,
        }
    }
}

impl KvDSTConfig {
    pub fn new(seed: u64) -> Self {
        KvDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no fault injection, exact shadow state
    pub fn calm(seed: u64) -> Self {
        KvDSTConfig {
            seed,
            client_config: SimulatedClientConfig::no_faults(),
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        KvDSTConfig {
            seed,
            client_config: SimulatedClientConfig::default(),
            compression: Some("zlib".to_string()),
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        KvDSTConfig {
            seed,
            client_config: SimulatedClientConfig::high_chaos(),
            compression: None,
            default_ttl: Some(Duration::from_secs(30)),
            ..Default::default()
        }
    }

    fn faults_enabled(&self) -> bool {
        let c = &self.client_config;
        c.request_fail_prob > 0.0 || c.row_fail_prob > 0.0 || c.connect_fail_prob > 0.0
    }
}

/// Key-value operation type
#[derive(Debug, Clone)]
pub enum KvOperation {
    Set { key: String, len: usize },
    Get { key: String },
    GetMany { keys: Vec<String> },
    Delete { key: String },
    DeleteMany { keys: Vec<String> },
    AdvanceClock { ms: u64 },
}

/// Outcome of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    /// Read served, with the number of values returned
    Read { hits: usize },
    /// Operation failed (expected under fault injection)
    Failed(String),
}

/// Recorded operation for history tracking
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: KvOperation,
    pub outcome: OperationOutcome,
    pub timestamp_ms: u64,
}

/// Workload generator
pub struct KvWorkload {
    rng: ChaCha8Rng,
    config: KvDSTConfig,
}

impl KvWorkload {
    pub fn new(config: KvDSTConfig) -> Self {
        KvWorkload {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
        }
    }

    fn key(&mut self) -> String {
        let index = self.rng.gen_range(0..self.config.key_space.max(1));
        format!("key_{:04}", index)
    }

    fn keys(&mut self) -> Vec<String> {
        let count = self.rng.gen_range(1..=self.config.max_bulk_keys.max(1));
        (0..count).map(|_| self.key()).collect()
    }

    /// Generate the next operation
    pub fn next_operation(&mut self) -> KvOperation {
        match self.rng.gen_range(0..100) {
            0..=39 => {
                let len = self.rng.gen_range(0..=self.config.max_value_len);
                KvOperation::Set {
                    key: self.key(),
                    len,
                }
            }
            40..=64 => KvOperation::Get { key: self.key() },
            65..=79 => KvOperation::GetMany { keys: self.keys() },
            80..=87 => KvOperation::Delete { key: self.key() },
            88..=94 => KvOperation::DeleteMany { keys: self.keys() },
            _ => KvOperation::AdvanceClock {
                ms: self.rng.gen_range(1..=60_000),
            },
        }
    }
}

/// Value written by operation `id`, `len` bytes long
fn make_value(id: u64, len: usize) -> Bytes {
    let pattern = format!("value-{}-", id);
    Bytes::from(pattern.bytes().cycle().take(len).collect::<Vec<u8>>())
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct KvDSTResult {
    /// Seed used
    pub seed: u64,
    /// Total operations attempted
    pub total_operations: u64,
    /// Successful operations
    pub successful_operations: u64,
    /// Failed operations (expected under faults)
    pub failed_operations: u64,
    /// Values returned by reads
    pub hits: u64,
    /// Client fault statistics
    pub client_stats: SimulatedClientStats,
    /// Invariant violations found
    pub invariant_violations: Vec<String>,
    /// Operation history
    pub history: Vec<RecordedOperation>,
}

impl KvDSTResult {
    pub fn new(seed: u64) -> Self {
        KvDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            hits: 0,
            client_stats: SimulatedClientStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed), {} hits, {} injected faults, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.hits,
            self.client_stats.request_failures + self.client_stats.row_failures,
            self.invariant_violations.len()
        )
    }
}

type DSTFactory = SimulatedClientFactory<InMemoryClientFactory<SimulatedClock>>;
type DSTStorage = TablestoreKvStorage<DSTFactory, SimulatedClock>;

/// Main DST harness for the key-value storage
pub struct KvDSTHarness {
    config: KvDSTConfig,
    clock: SimulatedClock,
    service: InMemoryTableService<SimulatedClock>,
    storage: DSTStorage,
    workload: KvWorkload,
    /// Exact expected state: value and write time. Only trusted without faults.
    model: HashMap<String, (Bytes, u64)>,
    /// Every value ever written per key
    written: HashMap<String, HashSet<Bytes>>,
    result: KvDSTResult,
}

impl KvDSTHarness {
    /// Create a new DST harness with a bootstrapped table
    pub fn new(config: KvDSTConfig) -> Result<Self, KvError> {
        let clock = SimulatedClock::new(START_MS);
        let service = InMemoryTableService::with_clock(clock.clone());

        // Bootstrap through a fault-free path so every run starts from a table
        let setup = TablestoreKvStorage::with_clock(
            KvStorageConfig::default(),
            service.factory(),
            clock.clone(),
        )?;
        setup.bootstrap(false)?;

        let mut kv_config = KvStorageConfig::default();
        kv_config.compression = config.compression.clone();
        kv_config.default_ttl = config.default_ttl;
        let factory = SimulatedClientFactory::new(
            service.factory(),
            config.seed.wrapping_add(1), // Different seed for the client
            config.client_config.clone(),
        );
        let storage = TablestoreKvStorage::with_clock(kv_config, factory, clock.clone())?;

        Ok(KvDSTHarness {
            workload: KvWorkload::new(config.clone()),
            result: KvDSTResult::new(config.seed),
            config,
            clock,
            service,
            storage,
            model: HashMap::new(),
            written: HashMap::new(),
        })
    }

    pub fn service(&self) -> &InMemoryTableService<SimulatedClock> {
        &self.service
    }

    /// Run the workload for a specified number of operations
    pub fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op);
        }
    }

    fn execute_operation(&mut self, op: KvOperation) {
        self.result.total_operations += 1;
        let op_id = self.result.total_operations;

        let outcome = match &op {
            KvOperation::Set { key, len } => self.execute_set(op_id, key, *len),
            KvOperation::Get { key } => self.execute_get(key),
            KvOperation::GetMany { keys } => self.execute_get_many(keys),
            KvOperation::Delete { key } => self.execute_delete(key),
            KvOperation::DeleteMany { keys } => self.execute_delete_many(keys),
            KvOperation::AdvanceClock { ms } => {
                self.clock.advance_ms(*ms);
                OperationOutcome::Success
            }
        };

        match &outcome {
            OperationOutcome::Success => self.result.successful_operations += 1,
            OperationOutcome::Read { hits } => {
                self.result.successful_operations += 1;
                self.result.hits += *hits as u64;
            }
            OperationOutcome::Failed(_) => self.result.failed_operations += 1,
        }

        self.result.history.push(RecordedOperation {
            id: op_id,
            operation: op,
            outcome,
            timestamp_ms: self.clock.now_ms(),
        });
    }

    fn execute_set(&mut self, op_id: u64, key: &str, len: usize) -> OperationOutcome {
        let value = make_value(op_id, len);
        self.written
            .entry(key.to_string())
            .or_default()
            .insert(value.clone());

        match self.storage.set(key, &value, None) {
            Ok(()) => {
                self.model
                    .insert(key.to_string(), (value, self.clock.now_ms()));
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    fn execute_get(&mut self, key: &str) -> OperationOutcome {
        let value = self.storage.get(key);
        self.check_read(key, value.as_ref());
        OperationOutcome::Read {
            hits: usize::from(value.is_some()),
        }
    }

    fn execute_get_many(&mut self, keys: &[String]) -> OperationOutcome {
        let results: Vec<(String, Bytes)> = self.storage.get_many(keys).collect();
        let requested: HashSet<&String> = keys.iter().collect();

        for (key, value) in &results {
            if !requested.contains(key) {
                self.result
                    .invariant_violations
                    .push(format!("get_many yielded unrequested key {}", key));
            }
            self.check_read(key, Some(value));
        }

        if !self.config.faults_enabled() {
            let expected = keys.iter().filter(|k| self.expected(k).is_some()).count();
            if expected != results.len() {
                self.result.invariant_violations.push(format!(
                    "get_many returned {} values, expected {}",
                    results.len(),
                    expected
                ));
            }
        }

        OperationOutcome::Read {
            hits: results.len(),
        }
    }

    fn execute_delete(&mut self, key: &str) -> OperationOutcome {
        self.storage.delete(key);
        if !self.config.faults_enabled() {
            self.model.remove(key);
        }
        OperationOutcome::Success
    }

    fn execute_delete_many(&mut self, keys: &[String]) -> OperationOutcome {
        match self.storage.delete_many(keys) {
            Ok(()) => {
                for key in keys {
                    self.model.remove(key);
                }
                OperationOutcome::Success
            }
            Err(e) => {
                if !self.config.faults_enabled() {
                    self.result
                        .invariant_violations
                        .push(format!("delete_many failed without faults: {}", e));
                }
                OperationOutcome::Failed(e.to_string())
            }
        }
    }

    /// Value that should be visible for `key` right now
    fn expected(&self, key: &str) -> Option<&Bytes> {
        let (value, written_at_ms) = self.model.get(key)?;
        match self.config.default_ttl {
            Some(ttl) if self.clock.is_expired(*written_at_ms, ttl) => None,
            _ => Some(value),
        }
    }

    fn check_read(&mut self, key: &str, actual: Option<&Bytes>) {
        if let Some(value) = actual {
            let known = self
                .written
                .get(key)
                .is_some_and(|values| values.contains(value));
            if !known {
                self.result.invariant_violations.push(format!(
                    "Read of {} returned {} bytes never written to it",
                    key,
                    value.len()
                ));
            }
        }

        if !self.config.faults_enabled() {
            let expected = self.expected(key).cloned();
            if expected.as_ref() != actual {
                self.result.invariant_violations.push(format!(
                    "Read of {} returned {:?} bytes, expected {:?}",
                    key,
                    actual.map(Bytes::len),
                    expected.as_ref().map(Bytes::len)
                ));
            }
        }
    }

    /// Check invariants after the run by reading back the whole key space
    pub fn check_invariants(&mut self) {
        let keys: Vec<String> = (0..self.config.key_space)
            .map(|i| format!("key_{:04}", i))
            .collect();
        for key in &keys {
            let value = self.storage.get(key);
            self.check_read(key, value.as_ref());
        }

        if let Some(stats) = self.storage.factory().stats() {
            self.result.client_stats = stats;
        }
    }

    /// Get the result
    pub fn result(&self) -> &KvDSTResult {
        &self.result
    }

    /// Consume and return the result
    pub fn into_result(self) -> KvDSTResult {
        self.result
    }
}

/// Run a batch of DST tests with different seeds
pub fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> KvDSTConfig,
) -> Result<Vec<KvDSTResult>, KvError> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = KvDSTHarness::new(config_fn(seed))?;
        harness.run(ops_per_run);
        harness.check_invariants();
        results.push(harness.into_result());
    }

    Ok(results)
}

/// Summary of batch results
pub fn summarize_batch(results: &[KvDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_hits: u64 = results.iter().map(|r| r.hits).sum();
    let total_faults: u64 = results
        .iter()
        .map(|r| r.client_stats.request_failures + r.client_stats.row_failures)
        .sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} hits, {} injected faults",
        passed, total, total_ops, total_hits, total_faults
    );

    if !failed_seeds.is_empty() {
        summary += &format!("\nFailed seeds: {:?}", failed_seeds);
    }

    summary
}
