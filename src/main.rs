//! Deterministic simulation of the node storage against an in-memory table
//! service with injected faults.
//!
//! Usage: `tablestore-sim [config.toml] [seed]`
//!
//! Set `LOG_FORMAT=json` for JSON log lines.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::env;
use tablestore_nodestore::client::{
    InMemoryTableService, SimulatedClientConfig, SimulatedClientFactory,
};
use tablestore_nodestore::config::NodeStorageConfig;
use tablestore_nodestore::kvstore::KvError;
use tablestore_nodestore::NodeStorage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const OPERATIONS: usize = 2_000;
const KEY_SPACE: u64 = 300;

#[derive(Debug, Default, Serialize)]
struct WorkloadStats {
    sets: u64,
    gets: u64,
    hits: u64,
    multi_gets: u64,
    multi_hits: u64,
    bulk_deletes: u64,
    bulk_delete_failures: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = match env::args().nth(1) {
        Some(path) => NodeStorageConfig::from_file(&path)?,
        None => NodeStorageConfig::default(),
    };
    let seed: u64 = env::args()
        .nth(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(42);

    println!("=== Table Store Node Storage Simulation ===\n");
    println!("Configuration:");
    println!("  Table: {}/{}", config.instance, config.table);
    println!("  Compression: {:?}", config.compression.strategy_name());
    println!("  Seed: {}\n", seed);

    let service = InMemoryTableService::new();
    let faults = SimulatedClientConfig::default();
    let factory = SimulatedClientFactory::new(service.factory(), seed, faults);
    let nodestore = NodeStorage::from_config(&config, factory)?;
    nodestore.bootstrap()?;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut stats = WorkloadStats::default();

    for _ in 0..OPERATIONS {
        let id = format!("node:{}", rng.gen_range(0..KEY_SPACE));
        match rng.gen_range(0..10) {
            0..=4 => {
                let len = rng.gen_range(16..4096);
                let payload: Vec<u8> = (0..len).map(|i| (i % 64) as u8 + b' ').collect();
                nodestore.set(&id, &payload, None)?;
                stats.sets += 1;
            }
            5..=7 => {
                stats.gets += 1;
                if nodestore.get(&id)?.is_some() {
                    stats.hits += 1;
                }
            }
            8 => {
                let ids: Vec<String> = (0..rng.gen_range(1..250))
                    .map(|_| format!("node:{}", rng.gen_range(0..KEY_SPACE)))
                    .collect();
                stats.multi_gets += 1;
                stats.multi_hits += nodestore
                    .get_multi(&ids)?
                    .values()
                    .filter(|v| v.is_some())
                    .count() as u64;
            }
            _ => {
                let ids: Vec<String> = (0..rng.gen_range(1..50))
                    .map(|_| format!("node:{}", rng.gen_range(0..KEY_SPACE)))
                    .collect();
                stats.bulk_deletes += 1;
                match nodestore.delete_multi(&ids) {
                    Ok(()) => {}
                    Err(KvError::BatchDelete(e)) => {
                        warn!(failed = e.failures.len(), "Bulk delete partially failed");
                        stats.bulk_delete_failures += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    info!(
        rows = service.row_count(&config.table),
        stats = %serde_json::to_string(&stats)?,
        "Workload finished"
    );

    println!("Workload:");
    println!("  {:?}", stats);
    if let Some(faults) = nodestore.store().factory().stats() {
        println!("Injected faults:");
        println!("  {:?}", faults);
    }
    println!("\nRows stored: {}", service.row_count(&config.table));

    Ok(())
}
