//! Async node storage
//!
//! Offloads the blocking storage calls to tokio's blocking thread pool so
//! async callers never stall the runtime on a network round trip.

use crate::kvstore::{KvError, KvStorage};
use crate::nodestore::NodeStorage;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub struct AsyncNodeStorage<S: KvStorage + 'static> {
    inner: Arc<NodeStorage<S>>,
}

impl<S: KvStorage + 'static> Clone for AsyncNodeStorage<S> {
    fn clone(&self) -> Self {
        AsyncNodeStorage {
            inner: self.inner.clone(),
        }
    }
}

impl<S: KvStorage + 'static> AsyncNodeStorage<S> {
    pub fn new(inner: NodeStorage<S>) -> Self {
        AsyncNodeStorage {
            inner: Arc::new(inner),
        }
    }

    pub fn inner(&self) -> &NodeStorage<S> {
        &self.inner
    }

    async fn run<T, Op>(&self, op: Op) -> Result<T, KvError>
    where
        T: Send + 'static,
        Op: FnOnce(&NodeStorage<S>) -> Result<T, KvError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| KvError::Background(format!("spawn_blocking join error: {}", e)))?
    }

    pub async fn get(&self, id: &str) -> Result<Option<Bytes>, KvError> {
        let id = id.to_string();
        self.run(move |store| store.get(&id)).await
    }

    pub async fn get_multi(
        &self,
        ids: Vec<String>,
    ) -> Result<HashMap<String, Option<Bytes>>, KvError> {
        self.run(move |store| store.get_multi(&ids)).await
    }

    pub async fn set(&self, id: &str, data: Bytes, ttl: Option<Duration>) -> Result<(), KvError> {
        let id = id.to_string();
        self.run(move |store| store.set(&id, &data, ttl)).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), KvError> {
        let id = id.to_string();
        self.run(move |store| store.delete(&id)).await
    }

    pub async fn delete_multi(&self, ids: Vec<String>) -> Result<(), KvError> {
        self.run(move |store| store.delete_multi(&ids)).await
    }

    pub async fn bootstrap(&self) -> Result<(), KvError> {
        self.run(|store| store.bootstrap()).await
    }

    pub async fn destroy(&self) -> Result<(), KvError> {
        self.run(|store| store.destroy()).await
    }
}
