//! Lazily constructed shared client
//!
//! The remote client is built on first use and then shared by every
//! operation for the lifetime of the adapter.
//!
//! ```text
//! Uninitialized ──(first successful connect)──► Initialized
//! ```
//!
//! Reads go through a lock-free fast path. Only callers that find no client
//! take the construction lock, and they re-check after acquiring it so a
//! client built by a concurrent caller is reused rather than rebuilt.

use crate::client::{ClientFactory, ClientOptions, ServiceError};
use parking_lot::Mutex;
use std::sync::OnceLock;
use tracing::debug;

/// Lifecycle of the shared client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Initialized,
}

pub struct LazyClient<F: ClientFactory> {
    factory: F,
    instance: String,
    options: ClientOptions,
    client: OnceLock<F::Client>,
    init_lock: Mutex<()>,
}

impl<F: ClientFactory> LazyClient<F> {
    pub fn new(factory: F, instance: String, options: ClientOptions) -> Self {
        LazyClient {
            factory,
            instance,
            options,
            client: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    /// The shared client, connecting on first use
    ///
    /// A failed connection leaves the state `Uninitialized`; the next call
    /// tries again.
    pub fn get(&self) -> Result<&F::Client, ServiceError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        let _guard = self.init_lock.lock();
        // Another caller may have connected while we waited for the lock
        if let Some(client) = self.client.get() {
            return Ok(client);
        }

        debug!(instance = %self.instance, "Connecting table store client");
        let client = self.factory.connect(&self.instance, &self.options)?;
        Ok(self.client.get_or_init(|| client))
    }

    pub fn state(&self) -> ClientState {
        if self.client.get().is_some() {
            ClientState::Initialized
        } else {
            ClientState::Uninitialized
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

impl<F: ClientFactory> std::fmt::Debug for LazyClient<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyClient")
            .field("instance", &self.instance)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InMemoryTableService, SimulatedClientConfig, SimulatedClientFactory};

    #[test]
    fn test_connects_once() {
        let service = InMemoryTableService::new();
        let options = ClientOptions::new();
        let lazy = LazyClient::new(service.factory(), "sentry".to_string(), options);
        assert_eq!(lazy.state(), ClientState::Uninitialized);
        assert_eq!(service.connections(), 0);

        let a = lazy.get().unwrap() as *const _;
        let b = lazy.get().unwrap() as *const _;
        assert_eq!(a, b);
        assert_eq!(service.connections(), 1);
        assert_eq!(lazy.state(), ClientState::Initialized);
    }

    #[test]
    fn test_failed_connect_is_retried() {
        let service = InMemoryTableService::new();
        let config = SimulatedClientConfig {
            connect_fail_prob: 1.0,
            ..SimulatedClientConfig::no_faults()
        };
        let lazy = LazyClient::new(
            SimulatedClientFactory::new(service.factory(), 7, config),
            "sentry".to_string(),
            ClientOptions::new(),
        );
        assert!(lazy.get().is_err());
        assert!(lazy.get().is_err());
        assert_eq!(lazy.state(), ClientState::Uninitialized);
        assert_eq!(service.connections(), 0);
    }
}
