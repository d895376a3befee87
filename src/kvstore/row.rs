//! Row codec
//!
//! Maps `(key, value)` pairs onto table rows and back:
//!
//! ```text
//! key   → primary key [("id", key)]
//! value → "data"  column (binary, possibly compressed)
//! flags → "flags" column (integer, written only when non-zero)
//! ```

use crate::client::{ColumnValue, PrimaryKey, Row};
use crate::clock::Clock;
use crate::kvstore::compression::{self, CompressionStrategy};
use crate::kvstore::error::KvError;
use crate::kvstore::flags::Flags;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

pub const ID_COLUMN: &str = "id";
pub const DATA_COLUMN: &str = "data";
pub const FLAGS_COLUMN: &str = "flags";

/// Largest encoded value accepted by the service (2 MiB)
pub const MAX_VALUE_SIZE: usize = 2 * 1024 * 1024;

/// Primary key of the row holding `key`
pub fn primary_key(key: &str) -> PrimaryKey {
    PrimaryKey::single(ID_COLUMN, key)
}

/// Key held by a row, if its primary key is exactly `[("id", key)]`
pub fn key_of(row: &Row) -> Option<&str> {
    match row.primary_key.0.as_slice() {
        [(column, key)] if column == ID_COLUMN => Some(key.as_str()),
        _ => None,
    }
}

fn lookup(name: &str) -> Result<&'static CompressionStrategy, KvError> {
    match compression::strategy(name) {
        Some(strategy) => Ok(strategy),
        None => Err(KvError::UnknownCompression {
            name: name.to_string(),
            known: compression::strategy_names(),
        }),
    }
}

/// Encoder/decoder between values and rows
///
/// The default TTL is always enforced on read, whether or not the table
/// also expires rows itself. A table without server-side expiry therefore
/// never serves a stale row.
#[derive(Debug, Clone)]
pub struct RowCodec {
    compression: Option<&'static CompressionStrategy>,
    default_ttl: Option<Duration>,
}

impl RowCodec {
    pub fn new(compression: Option<&str>, default_ttl: Option<Duration>) -> Result<Self, KvError> {
        let compression = compression.map(lookup).transpose()?;
        Ok(RowCodec {
            compression,
            default_ttl,
        })
    }

    pub fn compression(&self) -> Option<&'static CompressionStrategy> {
        self.compression
    }

    /// Build the row storing `value` under `key`
    ///
    /// Fails without side effects when the encoded value exceeds
    /// `MAX_VALUE_SIZE`.
    pub fn encode(&self, key: &str, value: &[u8]) -> Result<Row, KvError> {
        let mut flags = Flags::NONE;
        let data = match self.compression {
            Some(strategy) => {
                flags |= strategy.flag;
                let encoded = strategy.codec.encode(value);
                Bytes::from(encoded.map_err(KvError::Compression)?)
            }
            None => Bytes::copy_from_slice(value),
        };

        if data.len() > MAX_VALUE_SIZE {
            return Err(KvError::ValueTooLarge {
                size: data.len(),
                max: MAX_VALUE_SIZE,
            });
        }

        let mut columns = vec![(DATA_COLUMN.to_string(), ColumnValue::Binary(data))];
        // Only write the flags column at all if any flags are enabled
        if !flags.is_empty() {
            let bits = i64::from(flags.bits());
            columns.push((FLAGS_COLUMN.to_string(), ColumnValue::Integer(bits)));
        }
        Ok(Row::new(primary_key(key), columns))
    }

    /// Recover the value stored in `row`, `None` when it should read as absent
    pub fn decode<C: Clock>(&self, row: &Row, clock: &C) -> Option<Bytes> {
        let key = key_of(row).unwrap_or("<invalid key>");

        let data = match row.column(DATA_COLUMN) {
            Some(ColumnValue::Binary(data)) => data.clone(),
            Some(other) => {
                warn!(key, column = ?other, "Retrieved row with a non-binary data column");
                return None;
            }
            None => {
                warn!(key, "Retrieved row which does not contain a data column");
                return None;
            }
        };

        if let (Some(ttl), Some(written_at_ms)) = (self.default_ttl, row.written_at_ms) {
            if clock.is_expired(written_at_ms, ttl) {
                debug!(key, written_at_ms, "Row has outlived the default TTL");
                return None;
            }
        }

        let flags = match row.column(FLAGS_COLUMN) {
            Some(ColumnValue::Integer(bits)) => match Flags::from_column(*bits) {
                Some(flags) => flags,
                None => {
                    warn!(key, bits, "Ignoring out of range flags column");
                    Flags::NONE
                }
            },
            _ => Flags::NONE,
        };
        if flags.is_empty() {
            return Some(data);
        }

        match compression::decode_flagged(flags, data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, flags = flags.bits(), error = %e, "Failed to decompress row");
                None
            }
        }
    }
}
