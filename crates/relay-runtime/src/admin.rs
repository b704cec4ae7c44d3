//! Serializable reports for administration tooling.

use std::collections::BTreeMap;

use relay_core::HandlerDescriptor;
use relay_processor::SegmentStatus;
use serde::{Deserialize, Serialize};

/// Every handler registered with the runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerOverview {
    pub commands: Vec<HandlerDescriptor>,
    pub queries: Vec<HandlerDescriptor>,
    /// Event handlers by processor name.
    pub events: BTreeMap<String, Vec<HandlerDescriptor>>,
}

impl HandlerOverview {
    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.commands.len() + self.queries.len() + self.events.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State of one tracking processor on this instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorReport {
    pub name: String,
    /// Identifier under which this instance claims segments.
    pub owner: String,
    pub running: bool,
    pub blacklisting: bool,
    pub segments: Vec<SegmentStatus>,
}
