//! Key-Value Storage over a Wide-Column Table
//!
//! Stores opaque byte values under string keys, one row per key.
//!
//! ## Architecture
//!
//! ```text
//! KvStorage (get/set/delete, batched variants)
//!      ↓
//! RowCodec (compression flags, TTL check on read)
//!      ↓
//! LazyClient (connect once, share everywhere)
//!      ↓
//! TableClient (remote service)
//! ```

pub mod compression;
pub mod dst;
pub mod error;
pub mod flags;
pub mod lazy_client;
pub mod row;
pub mod storage;

pub use compression::{Codec, CompressionStrategy, COMPRESSION_STRATEGIES};
pub use error::{BatchDeleteError, KvError, RowFailure};
pub use flags::Flags;
pub use lazy_client::{ClientState, LazyClient};
pub use row::{RowCodec, MAX_VALUE_SIZE};
pub use storage::{GetMany, TablestoreKvStorage};

use bytes::Bytes;
use std::time::Duration;

/// Generic key-value storage interface
pub trait KvStorage: Send + Sync {
    /// Value stored under `key`, `None` when absent
    fn get(&self, key: &str) -> Result<Option<Bytes>, KvError>;

    /// Values of the `keys` that exist; missing keys are omitted
    fn get_many<'a>(
        &'a self,
        keys: &'a [String],
    ) -> Box<dyn Iterator<Item = (String, Bytes)> + 'a>;

    /// Store `value` under `key`, optionally with a time-to-live
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    fn delete(&self, key: &str) -> Result<(), KvError>;

    fn delete_many(&self, keys: &[String]) -> Result<(), KvError>;

    /// Create or update the backing storage
    fn bootstrap(&self, automatic_expiry: bool) -> Result<(), KvError>;

    /// Remove the backing storage
    fn destroy(&self) -> Result<(), KvError>;
}
