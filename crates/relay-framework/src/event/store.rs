use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_core::{
    DispatchInterceptor, DispatchResult, EventMessage, Message, RegistrationHandle,
    TrackedEventMessage, apply_dispatch_interceptors,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::{EventBus, EventSource, EventStream};
use crate::interceptors::InterceptorList;

/// Default time an event type stays suppressed on a stream.
pub const DEFAULT_SUPPRESSION_REFRESH: Duration = Duration::from_secs(5);

struct StoreInner {
    log: RwLock<Vec<TrackedEventMessage>>,
    appended: Notify,
    dispatch_interceptors: InterceptorList<dyn DispatchInterceptor<EventMessage>>,
    suppression_refresh: Duration,
}

/// An in-memory, append-only event log acting as both event bus and event
/// source.
#[derive(Clone)]
pub struct InMemoryEventStore {
    inner: Arc<StoreInner>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::with_suppression_refresh(DEFAULT_SUPPRESSION_REFRESH)
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose streams re-offer suppressed types after `refresh`.
    pub fn with_suppression_refresh(refresh: Duration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                log: RwLock::new(Vec::new()),
                appended: Notify::new(),
                dispatch_interceptors: InterceptorList::new(),
                suppression_refresh: refresh,
            }),
        }
    }

    pub fn suppression_refresh(&self) -> Duration {
        self.inner.suppression_refresh
    }

    /// Number of events in the log.
    pub fn len(&self) -> usize {
        self.inner.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.log.read().is_empty()
    }

    /// Returns a copy of the events from `from` onwards.
    pub fn read_from(&self, from: u64) -> Vec<TrackedEventMessage> {
        let log = self.inner.log.read();
        let start = usize::try_from(from).unwrap_or(usize::MAX).min(log.len());
        log[start..].to_vec()
    }

    /// Opens a concrete stream at `from`.
    pub fn stream(&self, from: u64) -> InMemoryEventStream {
        InMemoryEventStream {
            store: self.inner.clone(),
            position: from,
            suppressed: HashMap::new(),
        }
    }
}

impl EventBus for InMemoryEventStore {
    fn publish(&self, events: Vec<EventMessage>) -> DispatchResult<Vec<u64>> {
        let interceptors = self.inner.dispatch_interceptors.snapshot();
        let events = events
            .into_iter()
            .map(|event| apply_dispatch_interceptors(&interceptors, event))
            .collect::<DispatchResult<Vec<_>>>()
            .inspect_err(|error| debug!(%error, "Event batch rejected by dispatch interceptor"))?;

        let indices = {
            let mut log = self.inner.log.write();
            let first = log.len() as u64;
            let count = events.len() as u64;
            for (offset, event) in events.into_iter().enumerate() {
                trace!(
                    index = first + offset as u64,
                    event = event.event_type(),
                    id = %event.identifier(),
                    "Event appended"
                );
                log.push(TrackedEventMessage::new(first + offset as u64, event));
            }
            (first..first + count).collect::<Vec<_>>()
        };

        debug!(count = indices.len(), "Events published");
        self.inner.appended.notify_waiters();
        Ok(indices)
    }

    fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn DispatchInterceptor<EventMessage>>,
    ) -> RegistrationHandle {
        self.inner.dispatch_interceptors.push(interceptor)
    }
}

impl EventSource for InMemoryEventStore {
    fn open_stream(&self, from: u64) -> Box<dyn EventStream> {
        Box::new(self.stream(from))
    }

    fn head(&self) -> u64 {
        self.inner.log.read().len() as u64
    }
}

impl fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("events", &self.len())
            .field("suppression_refresh", &self.inner.suppression_refresh)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Stream
// ============================================================================

/// A stream over an [`InMemoryEventStore`].
pub struct InMemoryEventStream {
    store: Arc<StoreInner>,
    position: u64,
    /// Suppressed event type -> instant it is offered again.
    suppressed: HashMap<String, Instant>,
}

impl InMemoryEventStream {
    fn has_unread(&self) -> bool {
        (self.store.log.read().len() as u64) > self.position
    }

    fn is_suppressed(&mut self, event_type: &str, now: Instant) -> bool {
        match self.suppressed.get(event_type) {
            Some(until) if *until > now => true,
            Some(_) => {
                debug!(event = event_type, "Suppression expired, offering event type again");
                self.suppressed.remove(event_type);
                false
            }
            None => false,
        }
    }
}

#[async_trait]
impl EventStream for InMemoryEventStream {
    async fn has_next_available(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.store.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.has_unread() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.has_unread();
            }
        }
    }

    fn try_next(&mut self) -> Option<TrackedEventMessage> {
        let now = Instant::now();
        loop {
            let event = {
                let log = self.store.log.read();
                let index = usize::try_from(self.position).ok()?;
                log.get(index)?.clone()
            };
            self.position += 1;

            if self.is_suppressed(event.message().event_type(), now) {
                trace!(
                    index = event.index(),
                    event = event.message().event_type(),
                    "Skipping suppressed event"
                );
                continue;
            }
            return Some(event);
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn suppress(&mut self, event_type: &str) {
        if !self.suppressed.contains_key(event_type) {
            warn!(
                event = event_type,
                refresh = ?self.store.suppression_refresh,
                "Suppressing unhandled event type"
            );
        }
        self.suppressed.insert(
            event_type.to_string(),
            Instant::now() + self.store.suppression_refresh,
        );
    }

    fn clear_suppressed(&mut self) {
        self.suppressed.clear();
    }

    fn suppressed(&self) -> Vec<String> {
        let mut types: Vec<_> = self.suppressed.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for InMemoryEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEventStream")
            .field("position", &self.position)
            .field("suppressed", &self.suppressed.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{DispatchError, dispatch_interceptor};

    use super::*;

    #[tokio::test]
    async fn test_publish_assigns_consecutive_indices() {
        let store = InMemoryEventStore::new();
        let first = store
            .publish(vec![EventMessage::named("A", 1u8), EventMessage::named("B", 2u8)])
            .unwrap();
        let second = store.publish_one(EventMessage::named("C", 3u8)).unwrap();

        assert_eq!(first, vec![0, 1]);
        assert_eq!(second, 2);
        assert_eq!(store.head(), 3);
    }

    #[tokio::test]
    async fn test_veto_rejects_whole_batch() {
        let store = InMemoryEventStore::new();
        store.register_dispatch_interceptor(dispatch_interceptor(|event: EventMessage| {
            if event.event_type() == "Forbidden" {
                Err(DispatchError::vetoed("forbidden"))
            } else {
                Ok(event)
            }
        }));

        let result =
            store.publish(vec![EventMessage::named("A", ()), EventMessage::named("Forbidden", ())]);
        assert!(matches!(result, Err(DispatchError::Vetoed { .. })));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_stream_reads_in_order() {
        let store = InMemoryEventStore::new();
        store
            .publish((0..3u32).map(|i| EventMessage::named("Tick", i)).collect())
            .unwrap();

        let mut stream = store.open_stream(1);
        assert!(stream.has_next_available(Duration::ZERO).await);
        let indices: Vec<_> = std::iter::from_fn(|| stream.try_next()).map(|e| e.index()).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(stream.position(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_reader_is_woken() {
        let store = InMemoryEventStore::new();
        let mut stream = store.open_stream(0);

        let publisher = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish_one(EventMessage::named("Late", ())).unwrap();
        });

        assert!(stream.has_next_available(Duration::from_secs(1)).await);
        assert_eq!(stream.try_next().map(|e| e.index()), Some(0));
        assert!(!stream.has_next_available(Duration::from_millis(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppression_expires() {
        let store = InMemoryEventStore::with_suppression_refresh(Duration::from_secs(1));
        let mut stream = store.stream(0);
        stream.suppress("Unhandled");
        assert_eq!(stream.suppressed(), vec!["Unhandled".to_string()]);

        store
            .publish(vec![EventMessage::named("Unhandled", ()), EventMessage::named("Handled", ())])
            .unwrap();
        assert_eq!(stream.try_next().map(|e| e.index()), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        store.publish_one(EventMessage::named("Unhandled", ())).unwrap();
        assert_eq!(stream.try_next().map(|e| e.index()), Some(2));
        assert!(stream.suppressed().is_empty());
    }
}
