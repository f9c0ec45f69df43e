use serde::{Deserialize, Serialize};

use crate::kr_interface::BITNESS;
use crate::kr_key::{is_in_open_right_range, Key};

// ============================================================================
// Range
// ============================================================================

/// Half-open interval `[l_key, r_key)` of the circular key space, claimed at
/// a replication rank.
///
/// `l_key == r_key` denotes the entire ring. The cyclic width is fixed at
/// construction; serialization carries only the boundary triple and the
/// width is recomputed on deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "RangeRepr", into = "RangeRepr")]
pub struct Range {
    l_key: Key,
    r_key: Key,
    rank: u32,
    width: u128,
}

/// Serialized form of a `Range`: the boundary triple only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RangeRepr {
    l_key: Key,
    r_key: Key,
    rank: u32,
}

impl From<RangeRepr> for Range {
    fn from(repr: RangeRepr) -> Self {
        Range::new(repr.l_key, repr.r_key, repr.rank)
    }
}

impl From<Range> for RangeRepr {
    fn from(range: Range) -> Self {
        RangeRepr {
            l_key: range.l_key,
            r_key: range.r_key,
            rank: range.rank,
        }
    }
}

impl Range {
    pub fn new(l_key: Key, r_key: Key, rank: u32) -> Self {
        let width = if l_key == r_key {
            1u128 << BITNESS
        } else {
            l_key.distance_to(r_key) as u128
        };
        Self {
            l_key,
            r_key,
            rank,
            width,
        }
    }

    /// The entire key space at the given rank.
    pub fn full(rank: u32) -> Self {
        Range::new(Key::ZERO, Key::ZERO, rank)
    }

    pub fn l_key(&self) -> Key {
        self.l_key
    }

    pub fn r_key(&self) -> Key {
        self.r_key
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Cyclic width; the full ring is 2^BITNESS.
    pub fn width(&self) -> u128 {
        self.width
    }

    /// True when the interval crosses the zero point of the ring.
    pub fn is_wrapped(&self) -> bool {
        self.r_key <= self.l_key
    }

    /// True when the range denotes the entire key space.
    pub fn is_full(&self) -> bool {
        self.l_key == self.r_key
    }

    /// Half-open cyclic membership.
    pub fn contains(&self, key: Key) -> bool {
        is_in_open_right_range(self.l_key, self.r_key, key)
    }

    /// Two ranges are the same iff both boundary keys match; rank is a
    /// replication level, not part of the identity.
    pub fn is_same(&self, other: &Range) -> bool {
        self.l_key == other.l_key && self.r_key == other.r_key
    }

    /// True when `other` lies entirely inside this range.
    pub fn contains_range(&self, other: &Range) -> bool {
        self.l_key.distance_to(other.l_key) as u128 + other.width <= self.width
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_containment() {
        let range = Range::new(Key::new(100), Key::new(200), 0);

        // l_key is in, r_key is out
        assert!(range.contains(Key::new(100)));
        assert!(range.contains(Key::new(199)));
        assert!(!range.contains(Key::new(200)));
        assert!(!range.contains(Key::new(99)));
        assert!(!range.is_wrapped());
        assert_eq!(range.width(), 100);
    }

    #[test]
    fn test_wrapped_containment() {
        let range = Range::new(Key::new(u64::MAX - 10), Key::new(10), 0);

        assert!(range.is_wrapped());
        // keys after l_key and before r_key both belong to the interval
        assert!(range.contains(Key::new(u64::MAX - 10)));
        assert!(range.contains(Key::new(u64::MAX)));
        assert!(range.contains(Key::ZERO));
        assert!(range.contains(Key::new(9)));
        assert!(!range.contains(Key::new(10)));
        assert!(!range.contains(Key::new(5000)));
        assert_eq!(range.width(), 21);
    }

    #[test]
    fn test_full_ring() {
        let range = Range::new(Key::new(42), Key::new(42), 3);

        assert!(range.is_full());
        assert!(range.is_wrapped());
        assert!(range.contains(Key::ZERO));
        assert!(range.contains(Key::new(u64::MAX)));
        assert_eq!(range.width(), 1u128 << BITNESS);
        assert_eq!(range.rank(), 3);
    }

    #[test]
    fn test_is_same_ignores_rank() {
        let a = Range::new(Key::new(1), Key::new(5), 0);
        let b = Range::new(Key::new(1), Key::new(5), 2);
        let c = Range::new(Key::new(1), Key::new(6), 0);

        assert!(a.is_same(&b));
        assert!(!a.is_same(&c));
    }

    #[test]
    fn test_contains_range() {
        let outer = Range::new(Key::new(100), Key::new(300), 0);
        let inner = Range::new(Key::new(150), Key::new(250), 0);
        let crossing = Range::new(Key::new(250), Key::new(350), 0);

        assert!(outer.contains_range(&inner));
        assert!(outer.contains_range(&outer));
        assert!(!outer.contains_range(&crossing));
        assert!(!inner.contains_range(&outer));

        // the full ring contains everything, nothing partial contains it
        let full = Range::full(0);
        assert!(full.contains_range(&outer));
        assert!(full.contains_range(&full));
        assert!(!outer.contains_range(&full));
    }

    #[test]
    fn test_serde_round_trip_recomputes_width() {
        let range = Range::new(Key::new(u64::MAX - 7), Key::new(12), 1);
        let yaml = serde_yaml::to_string(&range).unwrap();
        let restored: Range = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(restored, range);
        assert_eq!(restored.width(), range.width());
        assert_eq!(restored.rank(), 1);

        let full = Range::full(0);
        let yaml = serde_yaml::to_string(&full).unwrap();
        let restored: Range = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored.width(), 1u128 << BITNESS);
    }
}
