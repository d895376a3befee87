//! Compression strategy registry
//!
//! A fixed, immutable table mapping strategy names to their flag bit and
//! codec. Iteration order is the table order: zlib, then zstd.

use crate::kvstore::flags::Flags;
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Result as IoResult, Write};

/// Zstd level used for new values
pub const ZSTD_LEVEL: i32 = 3;

/// Byte codec of a compression strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Zlib,
    Zstd { level: i32 },
}

impl Codec {
    pub fn encode(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        match self {
            Codec::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Codec::Zstd { level } => zstd::encode_all(data, *level),
        }
    }

    pub fn decode(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        match self {
            Codec::Zlib => {
                let mut decoded = Vec::new();
                ZlibDecoder::new(data).read_to_end(&mut decoded)?;
                Ok(decoded)
            }
            Codec::Zstd { .. } => zstd::decode_all(data),
        }
    }
}

/// Named compression strategy
#[derive(Debug, PartialEq, Eq)]
pub struct CompressionStrategy {
    pub name: &'static str,
    pub flag: Flags,
    pub codec: Codec,
}

/// All known strategies, in decode order
pub static COMPRESSION_STRATEGIES: [CompressionStrategy; 2] = [
    CompressionStrategy {
        name: "zlib",
        flag: Flags::COMPRESSED_ZLIB,
        codec: Codec::Zlib,
    },
    CompressionStrategy {
        name: "zstd",
        flag: Flags::COMPRESSED_ZSTD,
        codec: Codec::Zstd { level: ZSTD_LEVEL },
    },
];

/// Look up a strategy by name
pub fn strategy(name: &str) -> Option<&'static CompressionStrategy> {
    COMPRESSION_STRATEGIES.iter().find(|s| s.name == name)
}

/// Names of all strategies, for error messages
pub fn strategy_names() -> Vec<&'static str> {
    COMPRESSION_STRATEGIES.iter().map(|s| s.name).collect()
}

/// Undo the compression named by `flags`
///
/// The first registry strategy whose bit is set decodes the value. When no
/// bit matches, the value is returned as-is: data written by an unknown
/// strategy cannot be told apart from uncompressed data.
pub fn decode_flagged(flags: Flags, data: Bytes) -> IoResult<Bytes> {
    for s in COMPRESSION_STRATEGIES.iter() {
        if flags.contains(s.flag) {
            return s.codec.decode(&data).map(Bytes::from);
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"The quick brown fox jumps over the lazy dog. "
            .iter()
            .cycle()
            .take(4096)
            .copied()
            .collect()
    }

    #[test]
    fn test_registry_order() {
        assert_eq!(strategy_names(), vec!["zlib", "zstd"]);
        let zstd = strategy("zstd").map(|s| s.flag);
        assert_eq!(zstd, Some(Flags::COMPRESSED_ZSTD));
        assert!(strategy("lz4").is_none());
    }

    #[test]
    fn test_codecs_are_transparent() {
        let data = sample();
        for s in COMPRESSION_STRATEGIES.iter() {
            let encoded = s.codec.encode(&data).unwrap();
            assert!(
                encoded.len() < data.len(),
                "{} should shrink repetitive data",
                s.name
            );
            assert_eq!(s.codec.decode(&encoded).unwrap(), data);
        }
    }

    #[test]
    fn test_decode_unknown_flag_returns_input() {
        let data = Bytes::from_static(b"raw bytes");
        let unknown = Flags::from_bits(0b1000_0000);
        let decoded = decode_flagged(unknown, data.clone()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_decode_first_match_wins() {
        let data = sample();
        let encoded = Codec::Zlib.encode(&data).unwrap();
        let both = Flags::COMPRESSED_ZLIB | Flags::COMPRESSED_ZSTD;
        let decoded = decode_flagged(both, Bytes::from(encoded)).unwrap();
        assert_eq!(decoded.as_ref(), data.as_slice());
    }

    #[test]
    fn test_decode_corrupt_data_errors() {
        let garbage = Bytes::from_static(b"definitely not zstd");
        assert!(decode_flagged(Flags::COMPRESSED_ZSTD, garbage).is_err());
    }
}
