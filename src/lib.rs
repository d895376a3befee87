pub mod client;
pub mod clock;
pub mod config;
pub mod kvstore;
pub mod nodestore;

#[cfg(test)]
mod stateright;

pub use client::{ClientFactory, ServiceError, TableClient};
pub use config::{KvStorageConfig, NodeStorageConfig};
pub use kvstore::{KvError, KvStorage, TablestoreKvStorage};
pub use nodestore::{AsyncNodeStorage, NodeStorage, TablestoreNodeStorage};
