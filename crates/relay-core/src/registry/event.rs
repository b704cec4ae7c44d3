use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{CowCell, HandlerDescriptor, HandlerKind, RegistrationHandle, RegistrationId};
use crate::handler::BoxedHandler;
use crate::message::EventMessage;

/// An event handler subscribed to one event type.
#[derive(Clone)]
pub struct EventRegistration {
    id: RegistrationId,
    event_type: String,
    origin: String,
    handler: BoxedHandler<EventMessage>,
}

impl EventRegistration {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn handler(&self) -> &BoxedHandler<EventMessage> {
        &self.handler
    }

    pub fn describe(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            id: self.id,
            kind: HandlerKind::Event,
            discriminator: self.event_type.clone(),
            origin: self.origin.clone(),
            response_type: None,
        }
    }
}

impl fmt::Debug for EventRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistration")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

type EventTable = HashMap<String, Vec<EventRegistration>>;

/// Maps event types to their subscribed handlers.
#[derive(Clone, Default)]
pub struct EventHandlerRegistry {
    table: Arc<CowCell<EventTable>>,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        event_type: impl Into<String>,
        origin: impl Into<String>,
        handler: BoxedHandler<EventMessage>,
    ) -> RegistrationHandle {
        let registration = EventRegistration {
            id: RegistrationId::next(),
            event_type: event_type.into(),
            origin: origin.into(),
            handler,
        };
        let id = registration.id;
        let event_type = registration.event_type.clone();
        debug!(event = %event_type, origin = registration.origin(), %id, "Event handler installed");

        self.table
            .update(|table| table.entry(event_type.clone()).or_default().push(registration));

        let table = Arc::downgrade(&self.table);
        RegistrationHandle::new(
            id,
            Box::new(move |id| {
                let Some(table) = table.upgrade() else {
                    return false;
                };
                let mut guard = table.write();
                let installed = guard
                    .get(&event_type)
                    .is_some_and(|handlers| handlers.iter().any(|r| r.id == id));
                if !installed {
                    return false;
                }
                let table = Arc::make_mut(&mut guard);
                if let Some(handlers) = table.get_mut(&event_type) {
                    handlers.retain(|r| r.id != id);
                    if handlers.is_empty() {
                        table.remove(&event_type);
                    }
                }
                true
            }),
        )
    }

    /// Returns `true` if at least one handler is subscribed to `event_type`.
    pub fn can_handle(&self, event_type: &str) -> bool {
        self.table.load().contains_key(event_type)
    }

    /// Returns every handler subscribed to `event_type`, in registration order.
    pub fn resolve(&self, event_type: &str) -> Vec<EventRegistration> {
        self.table
            .load()
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.table.load().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    pub fn handlers(&self) -> Vec<HandlerDescriptor> {
        let mut handlers: Vec<_> = self
            .table
            .load()
            .values()
            .flatten()
            .map(EventRegistration::describe)
            .collect();
        handlers.sort_by_key(|descriptor| descriptor.id);
        handlers
    }
}

impl fmt::Debug for EventHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlerRegistry")
            .field("handlers", &self.len())
            .finish_non_exhaustive()
    }
}
