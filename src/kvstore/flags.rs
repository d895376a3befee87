//! Row flags bit field
//!
//! Stored in the `flags` column. Each set bit names the compression
//! strategy applied to the `data` column.

use std::ops::{BitOr, BitOrAssign};

/// Bit field of row flags
///
/// Compression flags are assumed to be mutually exclusive; nothing stops
/// both bits from being set, in which case decoding applies the first
/// matching strategy of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const COMPRESSED_ZLIB: Flags = Flags(1 << 0);
    pub const COMPRESSED_ZSTD: Flags = Flags(1 << 1);

    pub const fn from_bits(bits: u8) -> Self {
        Flags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every bit of `other` is set (never true for an empty `other`)
    pub const fn contains(self, other: Flags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Parse the integer stored in the `flags` column
    pub fn from_column(value: i64) -> Option<Self> {
        u8::try_from(value).ok().map(Flags)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}
