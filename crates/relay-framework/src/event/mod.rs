//! Event publication and consumption.
//!
//! Publishing goes through an [`EventBus`]: dispatch interceptors run, then
//! the events are appended to the log. Handlers are never invoked on the
//! publishing task; they consume the log through an [`EventSource`], usually
//! inside a tracking event processor.
//!
//! Readers open an [`EventStream`] at a log position and may *suppress*
//! event types they have no handler for. A suppressed type is skipped by
//! that stream until the store's refresh interval passes, after which it is
//! offered again so a handler registered in the meantime gets to see it.

mod store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{
    DispatchInterceptor, DispatchResult, EventMessage, RegistrationHandle, TrackedEventMessage,
};

pub use store::{DEFAULT_SUPPRESSION_REFRESH, InMemoryEventStore, InMemoryEventStream};

/// Publishes events.
pub trait EventBus: Send + Sync + 'static {
    /// Runs dispatch interceptors on every event and appends them, in order,
    /// to the log. If any event is vetoed, none are published.
    ///
    /// Returns the log indices assigned to the events.
    fn publish(&self, events: Vec<EventMessage>) -> DispatchResult<Vec<u64>>;

    /// Adds an interceptor run on every published event.
    fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn DispatchInterceptor<EventMessage>>,
    ) -> RegistrationHandle;

    /// Publishes a single event.
    fn publish_one(&self, event: EventMessage) -> DispatchResult<u64> {
        let indices = self.publish(vec![event])?;
        Ok(indices.first().copied().unwrap_or_default())
    }
}

/// A restartable source of tracked events.
pub trait EventSource: Send + Sync + 'static {
    /// Opens a stream starting at log index `from`.
    fn open_stream(&self, from: u64) -> Box<dyn EventStream>;

    /// Index the next published event will receive.
    fn head(&self) -> u64;
}

/// A cursor over the event log.
#[async_trait]
pub trait EventStream: Send {
    /// Waits until an event may be available or `timeout` passes.
    ///
    /// Returns `true` if the stream has unread events. The events may still
    /// all turn out to be suppressed, in which case [`try_next`](Self::try_next)
    /// returns `None`.
    async fn has_next_available(&mut self, timeout: Duration) -> bool;

    /// Returns the next unsuppressed event without waiting.
    fn try_next(&mut self) -> Option<TrackedEventMessage>;

    /// Index of the next event this stream will look at.
    fn position(&self) -> u64;

    /// Stops offering events of `event_type` until the refresh interval passes.
    fn suppress(&mut self, event_type: &str);

    /// Offers every suppressed event type again.
    fn clear_suppressed(&mut self);

    /// Event types currently suppressed.
    fn suppressed(&self) -> Vec<String>;
}
