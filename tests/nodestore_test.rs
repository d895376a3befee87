//! Node storage integration tests

use bytes::Bytes;
use std::time::Duration;
use tablestore_nodestore::client::{
    InMemoryClientFactory, InMemoryTableService, ReservedThroughput, ServiceError, TableClient,
};
use tablestore_nodestore::clock::SimulatedClock;
use tablestore_nodestore::config::{CompressionOption, NodeStorageConfig};
use tablestore_nodestore::kvstore::KvError;
use tablestore_nodestore::{
    AsyncNodeStorage, NodeStorage, TablestoreKvStorage, TablestoreNodeStorage,
};

type MemoryNodeStorage = TablestoreNodeStorage<InMemoryClientFactory>;

fn nodestore(config: &NodeStorageConfig) -> (InMemoryTableService, MemoryNodeStorage) {
    let service = InMemoryTableService::new();
    let factory = service.factory();
    let nodestore = NodeStorage::from_config(config, factory).unwrap();
    nodestore.bootstrap().unwrap();
    (service, nodestore)
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_config_from_toml() {
    let config = NodeStorageConfig::from_toml_str(
        r#"
        instance = "prod"
        table = "nodes"
        automatic_expiry = true
        default_ttl = 2592000
        compression = "zstd"
        endpoint = "https://prod.cn-hangzhou.ots.aliyuncs.com"

        [reserved_throughput]
        read = 0
        write = 0
        "#,
    )
    .unwrap();

    assert_eq!(config.instance, "prod");
    assert_eq!(config.table, "nodes");
    assert!(config.automatic_expiry);
    assert_eq!(
        config.default_ttl,
        Some(Duration::from_secs(30 * 24 * 3600))
    );
    assert_eq!(
        config.compression,
        CompressionOption::Named("zstd".to_string())
    );
    assert_eq!(
        config.client_options["endpoint"].as_str(),
        Some("https://prod.cn-hangzhou.ots.aliyuncs.com")
    );

    let kv = config.to_kv_config();
    assert_eq!(kv.table_name, "nodes");
    assert_eq!(kv.compression.as_deref(), Some("zstd"));
    assert_eq!(kv.reserved_throughput, ReservedThroughput::new(0, 0));
}

#[test]
fn test_compression_true_means_zlib() {
    let enabled = NodeStorageConfig::from_toml_str("compression = true");
    let kv = enabled.unwrap().to_kv_config();
    assert_eq!(kv.compression.as_deref(), Some("zlib"));

    let disabled = NodeStorageConfig::from_toml_str("compression = false");
    let kv = disabled.unwrap().to_kv_config();
    assert_eq!(kv.compression, None);
}

#[test]
fn test_client_options_keep_their_types() {
    let toml = "endpoint = \"https://x\"\nsocket_timeout = 50";
    let config = NodeStorageConfig::from_toml_str(toml).unwrap();
    let kv = config.to_kv_config();
    let options = &kv.client_options;
    assert_eq!(options["endpoint"].as_str(), Some("https://x"));
    assert_eq!(options["socket_timeout"].as_integer(), Some(50));

    let service = InMemoryTableService::new();
    let factory = service.factory();
    let nodestore = NodeStorage::from_config(&config, factory).unwrap();
    nodestore.bootstrap().unwrap();
    assert_eq!(service.connections(), 1);
}

#[test]
fn test_node_roundtrip() {
    let config = NodeStorageConfig {
        compression: CompressionOption::Enabled(true),
        ..Default::default()
    };
    let (_service, nodestore) = nodestore(&config);

    let payload = br#"{"path":"/sentry/event","data":{"message":"hello"}}"#.repeat(50);
    nodestore.set("node-1", &payload, None).unwrap();
    let stored = nodestore.get("node-1").unwrap();
    assert_eq!(stored.as_deref(), Some(payload.as_slice()));
    assert_eq!(nodestore.get("node-2").unwrap(), None);
}

#[test]
fn test_get_multi_maps_every_id() {
    let (_service, nodestore) = nodestore(&NodeStorageConfig::default());
    nodestore.set("a", b"1", None).unwrap();
    nodestore.set("c", b"3", None).unwrap();

    let result = nodestore.get_multi(&ids(&["a", "b", "c"])).unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result["a"], Some(Bytes::from_static(b"1")));
    assert_eq!(result["b"], None);
    assert_eq!(result["c"], Some(Bytes::from_static(b"3")));
}

#[test]
fn test_delete_multi_reports_failed_ids() {
    let (service, nodestore) = nodestore(&NodeStorageConfig::default());
    for id in ["a", "b", "c"] {
        nodestore.set(id, b"x", None).unwrap();
    }
    service.inject_row_error("b", ServiceError::new("OTSTimeout", "slow"));

    match nodestore.delete_multi(&ids(&["a", "b", "c"])) {
        Err(KvError::BatchDelete(e)) => assert_eq!(e.failed_keys(), vec!["b"]),
        other => panic!("unexpected result: {:?}", other),
    }
    service.clear_row_errors();
    assert_eq!(nodestore.get("a").unwrap(), None);
    assert!(nodestore.get("b").unwrap().is_some());
}

#[test]
fn test_single_delete_swallows_errors() {
    let (service, nodestore) = nodestore(&NodeStorageConfig::default());
    nodestore.set("a", b"x", None).unwrap();
    service.inject_row_error("a", ServiceError::new("OTSTimeout", "slow"));
    nodestore.delete_multi(&ids(&["a"])).unwrap();
    nodestore.delete("a").unwrap();
}

#[test]
fn test_ttl_override_is_rejected() {
    let config = NodeStorageConfig {
        default_ttl: Some(Duration::from_secs(3600)),
        ..Default::default()
    };
    let (_service, nodestore) = nodestore(&config);
    let default_ttl = Some(Duration::from_secs(3600));
    nodestore.set("a", b"x", default_ttl).unwrap();
    let shorter = Some(Duration::from_secs(60));
    let err = nodestore.set("a", b"x", shorter).unwrap_err();
    assert!(matches!(err, KvError::UnsupportedTtl { .. }));
}

#[test]
fn test_client_side_expiry() {
    let clock = SimulatedClock::new(1_000_000);
    let service = InMemoryTableService::with_clock(clock.clone());
    let config = NodeStorageConfig {
        default_ttl: Some(Duration::from_secs(60)),
        ..Default::default()
    };
    let kv_config = config.to_kv_config();
    let factory = service.factory();
    let store = TablestoreKvStorage::with_clock(kv_config, factory, clock.clone())
        .unwrap();
    let nodestore = NodeStorage::new(store, config.automatic_expiry);
    nodestore.bootstrap().unwrap();

    nodestore.set("a", b"x", None).unwrap();
    clock.advance_ms(59_999);
    assert!(nodestore.get("a").unwrap().is_some());
    clock.advance_ms(1);
    assert!(nodestore.get("a").unwrap().is_none());
    assert_eq!(nodestore.get_multi(&ids(&["a"])).unwrap()["a"], None);
}

#[test]
fn test_automatic_expiry_configures_table_ttl() {
    let config = NodeStorageConfig {
        automatic_expiry: true,
        default_ttl: Some(Duration::from_secs(7 * 24 * 3600)),
        ..Default::default()
    };
    let (service, _nodestore) = nodestore(&config);
    let description = service.client().describe_table("nodestore").unwrap();
    assert_eq!(description.table_options.time_to_live, 7 * 24 * 3600);
}

#[test]
fn test_expired_node_hidden_when_table_never_expires() {
    // Configured for server-side expiry, but the table was bootstrapped
    // without a time-to-live
    let clock = SimulatedClock::new(1_000_000);
    let service = InMemoryTableService::with_clock(clock.clone());
    let config = NodeStorageConfig {
        automatic_expiry: true,
        default_ttl: Some(Duration::from_secs(60)),
        ..Default::default()
    };
    let kv_config = config.to_kv_config();
    let factory = service.factory();
    let store = TablestoreKvStorage::with_clock(kv_config, factory, clock.clone())
        .unwrap();
    store.bootstrap(false).unwrap();
    let description = service.client().describe_table("nodestore").unwrap();
    assert_eq!(description.table_options.time_to_live, -1);

    store.set("k", b"v", None).unwrap();
    clock.advance(Duration::from_secs(3600));
    assert_eq!(service.row_count("nodestore"), 1);
    assert!(store.get("k").is_none());
    assert_eq!(store.get_many(&["k"]).count(), 0);

    let nodestore = NodeStorage::new(store, config.automatic_expiry);
    assert_eq!(nodestore.get("k").unwrap(), None);
    assert_eq!(nodestore.get_multi(&ids(&["k"])).unwrap()["k"], None);
}

#[test]
fn test_destroy_removes_table() {
    let (service, nodestore) = nodestore(&NodeStorageConfig::default());
    nodestore.destroy().unwrap();
    assert!(!service.has_table("nodestore"));
}

#[tokio::test]
async fn test_async_node_storage() {
    let service = InMemoryTableService::new();
    let config = NodeStorageConfig::default();
    let factory = service.factory();
    let nodestore = NodeStorage::from_config(&config, factory).unwrap();
    let nodestore = AsyncNodeStorage::new(nodestore);
    nodestore.bootstrap().await.unwrap();

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let nodestore = nodestore.clone();
            tokio::spawn(async move {
                let id = format!("node-{}", i);
                nodestore.set(&id, Bytes::from(id.clone()), None).await
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let all: Vec<String> = (0..8).map(|i| format!("node-{}", i)).collect();
    let result = nodestore.get_multi(all).await.unwrap();
    for (id, value) in &result {
        assert_eq!(value.as_deref(), Some(id.as_bytes()));
    }
    assert_eq!(service.connections(), 1);

    nodestore.destroy().await.unwrap();
    assert!(!service.has_table("nodestore"));
}
