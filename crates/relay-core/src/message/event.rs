use std::any::Any;
use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::{GenericMessage, Message, Payload};

/// Identifies the aggregate an event was applied to and its position in that
/// aggregate's own history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRef {
    pub id: String,
    pub sequence: u64,
}

/// A message recording a fact, delivered to zero or more handlers.
#[derive(Debug, Clone)]
pub struct EventMessage {
    message: GenericMessage,
    event_type: String,
    aggregate: Option<AggregateRef>,
}

impl EventMessage {
    /// Creates an event typed after its payload.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self::named(std::any::type_name::<T>(), payload)
    }

    /// Creates an event with an explicit type name.
    pub fn named<T: Any + Send + Sync>(event_type: impl Into<String>, payload: T) -> Self {
        Self::from_generic(event_type, GenericMessage::new(payload))
    }

    pub fn from_payload(event_type: impl Into<String>, payload: Payload) -> Self {
        Self::from_generic(event_type, GenericMessage::from_payload(payload))
    }

    pub fn from_generic(event_type: impl Into<String>, message: GenericMessage) -> Self {
        Self {
            message,
            event_type: event_type.into(),
            aggregate: None,
        }
    }

    /// Attaches the originating aggregate.
    pub fn for_aggregate(mut self, id: impl Into<String>, sequence: u64) -> Self {
        self.aggregate = Some(AggregateRef {
            id: id.into(),
            sequence,
        });
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate(&self) -> Option<&AggregateRef> {
        self.aggregate.as_ref()
    }

    /// The key used to assign this event to a segment.
    ///
    /// Events of one aggregate share a key and therefore a segment, which
    /// keeps them in order; events without an aggregate are spread by their
    /// own identifier.
    pub fn routing_key(&self) -> Cow<'_, str> {
        match &self.aggregate {
            Some(aggregate) => Cow::Borrowed(aggregate.id.as_str()),
            None => Cow::Owned(self.identifier().to_string()),
        }
    }
}

impl Message for EventMessage {
    fn generic(&self) -> &GenericMessage {
        &self.message
    }

    fn map_generic<F>(self, f: F) -> Self
    where
        F: FnOnce(GenericMessage) -> GenericMessage,
    {
        Self {
            message: f(self.message),
            event_type: self.event_type,
            aggregate: self.aggregate,
        }
    }

    fn discriminator(&self) -> &str {
        &self.event_type
    }
}

/// An event together with its position in the global event log.
#[derive(Debug, Clone)]
pub struct TrackedEventMessage {
    index: u64,
    message: EventMessage,
}

impl TrackedEventMessage {
    pub fn new(index: u64, message: EventMessage) -> Self {
        Self { index, message }
    }

    /// Zero-based position in the log.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn message(&self) -> &EventMessage {
        &self.message
    }

    pub fn into_message(self) -> EventMessage {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_key_prefers_aggregate() {
        let event = EventMessage::named("CardRedeemed", 5u32).for_aggregate("gc-7", 3);
        assert_eq!(event.routing_key(), "gc-7");
        assert_eq!(event.aggregate().map(|a| a.sequence), Some(3));

        let loose = EventMessage::named("Heartbeat", ());
        assert_eq!(loose.routing_key(), loose.identifier().to_string());
    }
}
