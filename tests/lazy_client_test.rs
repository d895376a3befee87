//! Lazy client concurrency tests
//!
//! Many threads race on the first operation of a fresh storage; the client
//! must be constructed exactly once and shared by all of them.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tablestore_nodestore::client::{
    InMemoryTableService, SimulatedClientConfig, SimulatedClientFactory,
};
use tablestore_nodestore::config::KvStorageConfig;
use tablestore_nodestore::kvstore::ClientState;
use tablestore_nodestore::TablestoreKvStorage;

const THREADS: usize = 16;

#[test]
fn test_concurrent_first_use_connects_once() {
    let delay = Duration::from_millis(20);
    let service = InMemoryTableService::new().with_connect_delay(delay);
    let config = KvStorageConfig::default();
    let factory = service.factory();
    let storage = Arc::new(TablestoreKvStorage::new(config, factory).unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let storage = storage.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                // The table is missing, so every read is a logged miss
                storage.get(&format!("key-{}", i))
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_none());
    }
    assert_eq!(service.connections(), 1);
    assert_eq!(storage.lazy_client().state(), ClientState::Initialized);
}

#[test]
fn test_concurrent_mixed_operations_share_client() {
    let delay = Duration::from_millis(10);
    let service = InMemoryTableService::new().with_connect_delay(delay);
    let config = KvStorageConfig::default().with_compression("zstd");
    let factory = service.factory();
    let storage = Arc::new(TablestoreKvStorage::new(config, factory).unwrap());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let storage = storage.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let key = format!("key-{}", i);
                match i % 4 {
                    0 => {
                        let _ = storage.bootstrap(false);
                    }
                    1 => storage.set(&key, b"value", None).unwrap(),
                    2 => storage.delete(&key),
                    _ => {
                        let _ = storage.get_many(&[key]).count();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(service.connections(), 1);
}

#[test]
fn test_failed_connect_is_retried() {
    let service = InMemoryTableService::new();
    let config = SimulatedClientConfig {
        connect_fail_prob: 1.0,
        ..SimulatedClientConfig::no_faults()
    };
    let storage = TablestoreKvStorage::new(
        KvStorageConfig::default(),
        SimulatedClientFactory::new(service.factory(), 3, config),
    )
    .unwrap();

    assert!(storage.get("a").is_none());
    assert!(storage.bootstrap(false).is_err());
    assert_eq!(storage.lazy_client().state(), ClientState::Uninitialized);
    assert_eq!(service.connections(), 0);
}
