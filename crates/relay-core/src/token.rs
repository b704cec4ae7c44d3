//! Tracking tokens: how far a segment has read the event log.

use serde::{Deserialize, Serialize};

use crate::error::{SegmentError, SegmentResult};
use crate::segment::Segment;

/// Position of a segment in the global event log.
///
/// Positions are expressed as the index of the next event to read, so a
/// token at `next = 0` has processed nothing and `next = n` has processed
/// events `0..n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingToken {
    /// Every event before `next` has been handled.
    Position { next: u64 },
    /// The result of merging two halves that had read different amounts.
    ///
    /// Events before `lower` are handled for the whole segment. Events in
    /// `lower..upper` are handled only if their key falls into `ahead`, the
    /// half that was further along.
    Merged { lower: u64, upper: u64, ahead: Segment },
}

impl TrackingToken {
    /// A token that starts reading at `next`.
    pub fn at(next: u64) -> Self {
        Self::Position { next }
    }

    /// A token at the very beginning of the log.
    pub fn tail() -> Self {
        Self::at(0)
    }

    /// The index reading should resume from.
    pub fn position(&self) -> u64 {
        match *self {
            Self::Position { next } => next,
            Self::Merged { lower, .. } => lower,
        }
    }

    /// The index after which no event has been handled for any key.
    pub fn upper_bound(&self) -> u64 {
        match *self {
            Self::Position { next } => next,
            Self::Merged { upper, .. } => upper,
        }
    }

    /// Returns `true` if the event at `index` whose routing key hashes to
    /// `hash` has already been handled.
    pub fn covers(&self, index: u64, hash: u32) -> bool {
        match *self {
            Self::Position { next } => index < next,
            Self::Merged {
                lower,
                upper,
                ahead,
            } => index < lower || (index < upper && ahead.matches(hash)),
        }
    }

    /// The token after the event at `index` has been handled.
    pub fn advanced_to(self, index: u64) -> Self {
        let next = index.saturating_add(1);
        match self {
            Self::Position { next: current } => Self::at(current.max(next)),
            Self::Merged {
                lower,
                upper,
                ahead,
            } => {
                if next >= upper {
                    Self::at(next)
                } else {
                    Self::Merged {
                        lower: lower.max(next),
                        upper,
                        ahead,
                    }
                }
            }
        }
    }

    /// Reconciles the tokens of two sibling segments being merged.
    ///
    /// Equal positions merge to the same position. Different positions
    /// produce a [`Merged`](Self::Merged) token remembering which half was
    /// ahead, so none of its events are delivered twice. A half that is
    /// itself still carrying a merged token cannot be merged again until it
    /// has caught up.
    pub fn merge(
        first: (&TrackingToken, Segment),
        second: (&TrackingToken, Segment),
    ) -> SegmentResult<TrackingToken> {
        let (&Self::Position { next: a }, &Self::Position { next: b }) = (first.0, second.0) else {
            return Err(SegmentError::PositionsIrreconcilable(first.1.id(), second.1.id()));
        };

        Ok(match a.cmp(&b) {
            std::cmp::Ordering::Equal => Self::at(a),
            std::cmp::Ordering::Less => Self::Merged {
                lower: a,
                upper: b,
                ahead: second.1,
            },
            std::cmp::Ordering::Greater => Self::Merged {
                lower: b,
                upper: a,
                ahead: first.1,
            },
        })
    }
}

impl Default for TrackingToken {
    fn default() -> Self {
        Self::tail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_covers_prefix() {
        let token = TrackingToken::at(5);
        assert!(token.covers(4, 0));
        assert!(!token.covers(5, 0));
        assert_eq!(token.advanced_to(5), TrackingToken::at(6));
        assert_eq!(token.advanced_to(2), TrackingToken::at(5));
    }

    #[test]
    fn test_merge_equal_positions() {
        let (left, right) = Segment::ROOT.split().unwrap();
        let merged =
            TrackingToken::merge((&TrackingToken::at(7), left), (&TrackingToken::at(7), right));
        assert_eq!(merged, Ok(TrackingToken::at(7)));
    }

    #[test]
    fn test_merge_remembers_ahead_half() {
        let (left, right) = Segment::ROOT.split().unwrap();
        let merged =
            TrackingToken::merge((&TrackingToken::at(3), left), (&TrackingToken::at(8), right))
                .unwrap();

        assert_eq!(merged.position(), 3);
        assert_eq!(merged.upper_bound(), 8);
        // Odd hashes belong to the right half, which already saw 3..8.
        assert!(merged.covers(5, 1));
        assert!(!merged.covers(5, 2));
        assert!(!merged.covers(8, 1));

        let advanced = merged.advanced_to(4);
        assert!(matches!(advanced, TrackingToken::Merged { lower: 5, upper: 8, .. }));
        assert_eq!(advanced.advanced_to(7), TrackingToken::at(8));
    }

    #[test]
    fn test_merge_of_merged_is_rejected() {
        let (left, right) = Segment::ROOT.split().unwrap();
        let pending = TrackingToken::Merged {
            lower: 1,
            upper: 4,
            ahead: left,
        };
        assert_eq!(
            TrackingToken::merge((&pending, left), (&TrackingToken::at(2), right)),
            Err(SegmentError::PositionsIrreconcilable(0, 1))
        );
    }

    #[test]
    fn test_serialized_form() {
        let json = serde_json::to_value(TrackingToken::at(3)).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "position", "next": 3 }));
    }
}
