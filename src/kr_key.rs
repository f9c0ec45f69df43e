use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kr_interface::{Address, BITNESS};

// ============================================================================
// Key
// ============================================================================

/// Fixed-width identifier on the circular key space.
///
/// All arithmetic wraps modulo 2^BITNESS; `distance_to` measures clockwise
/// (direction-aware) cyclic distance. Bit index 0 is the highest-order bit,
/// matching prefix-based addressing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Key(u64);

impl Key {
    pub const ZERO: Key = Key(0);

    pub fn new(raw: u64) -> Self {
        Key(raw)
    }

    /// Key of a node address. Addresses and keys share the same u64 ring.
    pub fn from_address(address: Address) -> Self {
        Key(address)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Bit at `index`, counted from the highest-order bit.
    pub fn bit(self, index: u32) -> bool {
        debug_assert!(index < BITNESS);
        (self.0 >> (BITNESS - 1 - index)) & 1 == 1
    }

    /// Copy of this key with the bit at `index` set to `value`.
    pub fn with_bit(self, index: u32, value: bool) -> Key {
        debug_assert!(index < BITNESS);
        let mask = 1u64 << (BITNESS - 1 - index);
        if value {
            Key(self.0 | mask)
        } else {
            Key(self.0 & !mask)
        }
    }

    /// Ring increment.
    pub fn next(self) -> Key {
        Key(self.0.wrapping_add(1))
    }

    /// Ring decrement.
    pub fn prev(self) -> Key {
        Key(self.0.wrapping_sub(1))
    }

    /// Clockwise cyclic distance from `self` to `other`.
    pub fn distance_to(self, other: Key) -> u64 {
        other.0.wrapping_sub(self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Number of matching high-order bits of `a` and `b`, capped at `max_bits`.
pub fn common_prefix_len(a: Key, b: Key, max_bits: u32) -> u32 {
    (a.0 ^ b.0).leading_zeros().min(max_bits)
}

/// Half-open cyclic membership test for `[l, r)`.
///
/// `l == r` denotes the entire ring and contains every key.
pub fn is_in_open_right_range(l: Key, r: Key, key: Key) -> bool {
    if l == r {
        true
    } else if l < r {
        l <= key && key < r
    } else {
        // wrapped: the interval covers the zero crossing
        key >= l || key < r
    }
}
