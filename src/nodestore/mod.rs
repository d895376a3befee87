//! Node Storage
//!
//! Exposes a key-value storage as a node storage backend: node ids are
//! keys, serialized node payloads are values.
//!
//! ```ignore
//! let config = NodeStorageConfig {
//!     instance: "sentry".to_string(),
//!     table: "nodestore".to_string(),
//!     default_ttl: Some(Duration::from_secs(30 * 24 * 3600)),
//!     compression: CompressionOption::Enabled(true),
//!     ..Default::default()
//! };
//! let nodestore = TablestoreNodeStorage::from_config(&config, factory)?;
//! nodestore.bootstrap()?;
//! ```

pub mod async_storage;

pub use async_storage::AsyncNodeStorage;

use crate::client::ClientFactory;
use crate::clock::SystemClock;
use crate::config::NodeStorageConfig;
use crate::kvstore::{KvError, KvStorage, TablestoreKvStorage};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info_span;

/// Node storage over any key-value storage
#[derive(Debug)]
pub struct NodeStorage<S: KvStorage> {
    store: S,
    automatic_expiry: bool,
}

/// Node storage backed by the table store
pub type TablestoreNodeStorage<F, C = SystemClock> = NodeStorage<TablestoreKvStorage<F, C>>;

impl<F: ClientFactory> NodeStorage<TablestoreKvStorage<F>> {
    pub fn from_config(config: &NodeStorageConfig, factory: F) -> Result<Self, KvError> {
        let store = TablestoreKvStorage::new(config.to_kv_config(), factory)?;
        Ok(NodeStorage::new(store, config.automatic_expiry))
    }
}

impl<S: KvStorage> NodeStorage<S> {
    pub fn new(store: S, automatic_expiry: bool) -> Self {
        NodeStorage {
            store,
            automatic_expiry,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn get(&self, id: &str) -> Result<Option<Bytes>, KvError> {
        self.store.get(id)
    }

    /// Every requested id mapped to its payload, `None` for misses
    pub fn get_multi(&self, ids: &[String]) -> Result<HashMap<String, Option<Bytes>>, KvError> {
        let mut result: HashMap<String, Option<Bytes>> =
            ids.iter().map(|id| (id.clone(), None)).collect();
        for (id, value) in self.store.get_many(ids) {
            result.insert(id, Some(value));
        }
        Ok(result)
    }

    pub fn set(&self, id: &str, data: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        self.store.set(id, data, ttl)
    }

    pub fn delete(&self, id: &str) -> Result<(), KvError> {
        let span = info_span!("nodestore.tablestore.delete");
        let _enter = span.enter();
        self.store.delete(id)
    }

    pub fn delete_multi(&self, ids: &[String]) -> Result<(), KvError> {
        let span = info_span!("nodestore.tablestore.delete_multi", num_ids = ids.len());
        let _enter = span.enter();

        if let [id] = ids {
            return self.delete(id);
        }
        self.store.delete_many(ids)
    }

    /// Create or reconcile the table with the configured expiry mode
    pub fn bootstrap(&self) -> Result<(), KvError> {
        self.store.bootstrap(self.automatic_expiry)
    }

    pub fn destroy(&self) -> Result<(), KvError> {
        self.store.destroy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryClientFactory, InMemoryTableService, RequestRecord};

    type MemoryNodeStorage = TablestoreNodeStorage<InMemoryClientFactory>;

    fn nodestore() -> (InMemoryTableService, MemoryNodeStorage) {
        let service = InMemoryTableService::new();
        let config = NodeStorageConfig::default();
        let factory = service.factory();
        let storage = NodeStorage::from_config(&config, factory).unwrap();
        storage.bootstrap().unwrap();
        (service, storage)
    }

    #[test]
    fn test_get_multi_includes_misses() {
        let (_service, storage) = nodestore();
        storage.set("a", b"1", None).unwrap();

        let ids = vec!["a".to_string(), "b".to_string()];
        let result = storage.get_multi(&ids).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result["a"], Some(Bytes::from_static(b"1")));
        assert_eq!(result["b"], None);
    }

    #[test]
    fn test_delete_multi_single_id_uses_point_delete() {
        let (service, storage) = nodestore();
        service.clear_requests();
        storage.delete_multi(&["a".to_string()]).unwrap();
        let expected = RequestRecord::DeleteRow {
            table: "nodestore".to_string(),
        };
        assert_eq!(service.requests(), vec![expected]);
    }

    #[test]
    fn test_unknown_compression_rejected_at_construction() {
        let config = NodeStorageConfig {
            compression: crate::config::CompressionOption::Named("snappy".to_string()),
            ..Default::default()
        };
        let factory = InMemoryTableService::new().factory();
        let err = NodeStorage::from_config(&config, factory).unwrap_err();
        assert!(matches!(err, KvError::UnknownCompression { .. }));
    }
}
