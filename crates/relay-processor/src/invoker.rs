//! Delivery of one event to the processor's handlers.

use std::sync::Arc;

use relay_core::{
    BoxedHandler, BoxedHandlerInterceptor, DispatchError, EventHandlerRegistry, EventMessage,
    HandlerDescriptor, HandlerInterceptor, RegistrationHandle, Segment, chain,
};
use relay_framework::InterceptorList;
use tracing::trace;

tokio::task_local! {
    static CURRENT_SEGMENT: Segment;
}

/// Returns the segment whose worker is running the current handler.
///
/// Handlers and handler interceptors invoked by a tracking processor can use
/// this to tell which slice of the key space they are serving. Outside a
/// processor it returns `None`.
pub fn current_segment() -> Option<Segment> {
    CURRENT_SEGMENT.try_with(|segment| *segment).ok()
}

/// A handler that failed for one event.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub handler: String,
    pub error: DispatchError,
}

/// Invokes every subscribed handler for an event, each wrapped in the
/// processor's handler interceptors.
#[derive(Clone, Default)]
pub struct EventHandlerInvoker {
    registry: EventHandlerRegistry,
    interceptors: Arc<InterceptorList<dyn HandlerInterceptor<EventMessage>>>,
}

impl EventHandlerInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        origin: impl Into<String>,
        handler: BoxedHandler<EventMessage>,
    ) -> RegistrationHandle {
        self.registry.register(event_type, origin, handler)
    }

    pub fn register_handler_interceptor(
        &self,
        interceptor: BoxedHandlerInterceptor<EventMessage>,
    ) -> RegistrationHandle {
        self.interceptors.push(interceptor)
    }

    /// Returns `true` if any handler is subscribed to `event_type`.
    pub fn can_handle(&self, event_type: &str) -> bool {
        self.registry.can_handle(event_type)
    }

    pub fn handlers(&self) -> Vec<HandlerDescriptor> {
        self.registry.handlers()
    }

    /// Runs the handlers for `event` in registration order on behalf of
    /// `segment`, collecting the failures.
    pub async fn handle(&self, event: &EventMessage, segment: Segment) -> Vec<HandlerFailure> {
        let registrations = self.registry.resolve(event.event_type());
        let interceptors = self.interceptors.snapshot();
        let mut failures = Vec::new();

        for registration in registrations {
            trace!(handler = registration.origin(), %segment, "Invoking event handler");
            let event = event.clone();
            let interceptors = interceptors.clone();
            let handler = registration.handler().clone();
            let invocation = async move { chain(event, interceptors, handler).await };
            if let Err(error) = CURRENT_SEGMENT.scope(segment, invocation).await {
                failures.push(HandlerFailure {
                    handler: registration.origin().to_string(),
                    error,
                });
            }
        }
        failures
    }
}
