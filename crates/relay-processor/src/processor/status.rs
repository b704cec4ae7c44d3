use relay_core::{Segment, TrackingToken};
use serde::{Deserialize, Serialize};

/// Processing state of one segment, as reported by
/// [`TrackingEventProcessor::status`](super::TrackingEventProcessor::status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStatus {
    pub segment: Segment,
    pub token: TrackingToken,
    /// `false` once the worker has stopped, e.g. after a propagated failure.
    pub active: bool,
    /// `true` when the worker has read up to the head of the log.
    pub caught_up: bool,
    /// The failure that halted the segment, if any.
    pub error: Option<String>,
}

impl SegmentStatus {
    pub(crate) fn started(segment: Segment, token: TrackingToken) -> Self {
        Self {
            segment,
            token,
            active: true,
            caught_up: false,
            error: None,
        }
    }

    /// Index the segment will read next.
    pub fn position(&self) -> u64 {
        self.token.position()
    }
}
