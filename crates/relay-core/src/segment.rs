//! Segments of the routing key space.
//!
//! A segment `(id, mask)` selects every routing key whose 32-bit hash
//! satisfies `hash & mask == id`. The root segment `(0, 0)` selects every
//! key. Masks are always of the form `2^k - 1`, so splitting a segment
//! divides it into two halves that differ in bit `k`:
//!
//! ```text
//!              (0, 0b00)
//!             /         \
//!      (0, 0b01)       (1, 0b01)
//!                     /         \
//!              (1, 0b11)       (3, 0b11)
//! ```
//!
//! Merging is the inverse: a segment and its sibling (the other half of
//! their parent) combine back into the parent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{SegmentError, SegmentResult};

/// Hashes a routing key onto the 32-bit segment key space.
pub fn hash_routing_key(key: impl AsRef<[u8]>) -> u32 {
    // 32-bit FNV-1a, stable across platforms and releases.
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    key.as_ref().iter().fold(OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(PRIME)
    })
}

/// A slice of the routing key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Segment {
    id: u32,
    mask: u32,
}

impl Segment {
    /// The segment covering the whole key space.
    pub const ROOT: Segment = Segment { id: 0, mask: 0 };

    /// Creates a segment, rejecting masks that are not `2^k - 1` or ids
    /// outside the mask.
    pub fn new(id: u32, mask: u32) -> Option<Self> {
        let well_formed = mask.wrapping_add(1) & mask == 0 && id & !mask == 0;
        well_formed.then_some(Self { id, mask })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn is_root(&self) -> bool {
        self.mask == 0
    }

    /// Returns `true` if `hash` falls into this segment.
    pub fn matches(&self, hash: u32) -> bool {
        hash & self.mask == self.id
    }

    /// Returns `true` if `key` hashes into this segment.
    pub fn matches_key(&self, key: impl AsRef<[u8]>) -> bool {
        self.matches(hash_routing_key(key))
    }

    /// The share of the key space covered, as a count of hash values.
    pub fn width(&self) -> u64 {
        (1u64 << 32) >> self.mask.count_ones()
    }

    /// Returns `false` once the mask uses all 32 bits.
    pub fn can_split(&self) -> bool {
        self.mask != u32::MAX
    }

    /// Divides the segment into two halves.
    ///
    /// The first half keeps this segment's id.
    pub fn split(&self) -> SegmentResult<(Segment, Segment)> {
        if !self.can_split() {
            return Err(SegmentError::AtMinimumGranularity(self.id));
        }
        let mask = (self.mask << 1) | 1;
        let bit = self.mask.wrapping_add(1);
        Ok((
            Segment { id: self.id, mask },
            Segment {
                id: self.id | bit,
                mask,
            },
        ))
    }

    /// The segment this one was split from.
    pub fn parent(&self) -> Option<Segment> {
        if self.is_root() {
            return None;
        }
        let mask = self.mask >> 1;
        Some(Segment {
            id: self.id & mask,
            mask,
        })
    }

    /// The other half of this segment's parent.
    pub fn sibling(&self) -> Option<Segment> {
        let parent = self.parent()?;
        Some(Segment {
            id: self.id ^ parent.mask.wrapping_add(1),
            mask: self.mask,
        })
    }

    /// Combines this segment with its sibling into their parent.
    pub fn merged_with(&self, other: &Segment) -> SegmentResult<Segment> {
        let sibling = self.sibling().ok_or(SegmentError::NoSibling(self.id))?;
        if sibling != *other {
            return Err(SegmentError::SiblingNotFound {
                segment: self.id,
                sibling: sibling.id,
            });
        }
        self.parent().ok_or(SegmentError::NoSibling(self.id))
    }

    /// Returns `true` if some hash value falls into both segments.
    pub fn overlaps(&self, other: &Segment) -> bool {
        let common = self.mask & other.mask;
        self.id & common == other.id & common
    }

    /// Creates `count` equally sized segments. `count` must be a power of two.
    pub fn initial_segments(count: u32) -> Option<Vec<Segment>> {
        if !count.is_power_of_two() {
            return None;
        }
        let mask = count - 1;
        Some((0..count).map(|id| Segment { id, mask }).collect())
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::ROOT
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Segment[{}/{}]", self.id, self.mask)
    }
}

/// Returns `true` if `segments` cover every hash value exactly once.
pub fn covers_key_space(segments: &[Segment]) -> bool {
    let total: u64 = segments.iter().map(Segment::width).sum();
    if total != 1u64 << 32 {
        return false;
    }
    segments
        .iter()
        .enumerate()
        .all(|(i, a)| segments[i + 1..].iter().all(|b| !a.overlaps(b)))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_fnv_reference_values() {
        assert_eq!(hash_routing_key(""), 0x811c_9dc5);
        assert_eq!(hash_routing_key("a"), 0xe40c_292c);
        assert_eq!(hash_routing_key("foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_root_matches_everything() {
        assert!(Segment::ROOT.matches(0));
        assert!(Segment::ROOT.matches(u32::MAX));
        assert!(Segment::ROOT.matches_key("gc-1"));
        assert!(Segment::ROOT.sibling().is_none());
    }

    #[test]
    fn test_split_halves() {
        let (left, right) = Segment::ROOT.split().unwrap();
        assert_eq!((left.id(), left.mask()), (0, 1));
        assert_eq!((right.id(), right.mask()), (1, 1));

        let (a, b) = right.split().unwrap();
        assert_eq!((a.id(), a.mask()), (1, 3));
        assert_eq!((b.id(), b.mask()), (3, 3));
        assert_eq!(b.sibling(), Some(a));
        assert_eq!(a.parent(), Some(right));
        assert!(covers_key_space(&[left, a, b]));
    }

    #[test]
    fn test_every_hash_lands_in_one_child() {
        let (a, b) = Segment::new(2, 3).unwrap().split().unwrap();
        for hash in [2u32, 6, 10, 14, 0xffff_fffe] {
            assert!(a.matches(hash) ^ b.matches(hash), "hash {hash:#x}");
        }
    }

    #[test]
    fn test_minimum_granularity() {
        let finest = Segment::new(7, u32::MAX).unwrap();
        assert!(!finest.can_split());
        assert_eq!(finest.split(), Err(SegmentError::AtMinimumGranularity(7)));
    }

    #[test]
    fn test_merge_requires_sibling() {
        let (left, right) = Segment::ROOT.split().unwrap();
        assert_eq!(left.merged_with(&right), Ok(Segment::ROOT));

        let (r0, _) = right.split().unwrap();
        assert!(matches!(left.merged_with(&r0), Err(SegmentError::SiblingNotFound { .. })));
        assert_eq!(Segment::ROOT.merged_with(&left), Err(SegmentError::NoSibling(0)));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Segment::new(0, 2).is_none());
        assert!(Segment::new(4, 3).is_none());
        assert!(Segment::new(3, 3).is_some());
    }

    #[test]
    fn test_initial_segments() {
        let segments = Segment::initial_segments(4).unwrap();
        assert_eq!(segments.len(), 4);
        assert!(covers_key_space(&segments));
        assert!(Segment::initial_segments(3).is_none());
    }

    #[test]
    fn test_coverage_detects_gaps_and_overlaps() {
        let (left, right) = Segment::ROOT.split().unwrap();
        assert!(!covers_key_space(&[left]));
        assert!(!covers_key_space(&[left, right, Segment::ROOT]));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Any sequence of splits and sibling merges keeps the key space
        /// covered exactly once.
        #[test]
        fn test_split_merge_sequences_keep_coverage(
            operations in prop::collection::vec(
                (any::<bool>(), any::<prop::sample::Index>()),
                1..64,
            )
        ) {
            let mut segments = vec![Segment::ROOT];

            for (split, pick) in operations {
                let chosen = segments[pick.index(segments.len())];
                if split {
                    if let Ok((a, b)) = chosen.split() {
                        segments.retain(|s| *s != chosen);
                        segments.push(a);
                        segments.push(b);
                    }
                } else if let Some(sibling) = chosen.sibling() {
                    if segments.contains(&sibling) {
                        let parent = chosen.merged_with(&sibling).unwrap();
                        segments.retain(|s| *s != chosen && *s != sibling);
                        segments.push(parent);
                    }
                }
                prop_assert!(covers_key_space(&segments));
            }
        }

        #[test]
        fn test_every_key_has_exactly_one_owner(key in ".{0,24}", splits in 0u32..6) {
            let segments = Segment::initial_segments(1 << splits).unwrap();
            let owners = segments.iter().filter(|s| s.matches_key(&key)).count();
            prop_assert_eq!(owners, 1);
        }
    }
}
