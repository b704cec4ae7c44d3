//! The tracking event processor.
//!
//! A processor consumes the event log on behalf of a set of event handlers.
//! The routing key space is divided into [`Segment`]s persisted in a
//! [`TokenStore`]; every running instance claims unowned segments and starts
//! one worker per claimed segment. A worker reads the log from its segment's
//! token, handles the events whose routing key falls into the segment and
//! stores its progress after every batch.
//!
//! # Segment operations
//!
//! Segments can be split, merged and released while the processor runs. The
//! request is queued for the worker owning the segment and applied between
//! two batches:
//!
//! ```rust,ignore
//! let (kept, handed_off) = processor.split_segment(0).await?;
//! let merged = processor.merge_segment(kept.id()).await?;
//! ```
//!
//! # Blacklisting
//!
//! When no handler subscribes to an event type, the worker asks its stream
//! to suppress that type. Suppressed events are skipped, not delivered, and
//! offered again after the store's refresh interval or as soon as
//! blacklisting is turned off.

mod coordinator;
mod operation;
mod status;
mod worker;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use relay_core::{
    BoxedHandler, BoxedHandlerInterceptor, EventMessage, HandlerDescriptor, RegistrationHandle,
    Segment, SegmentError, SegmentResult, TrackingToken,
};
use relay_framework::EventSource;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};
use uuid::Uuid;

pub use operation::SegmentOperation;
pub use status::SegmentStatus;

use crate::config::{InitialPosition, TrackingProcessorConfig};
use crate::error::{ProcessorError, ProcessorResult};
use crate::error_handler::ErrorHandler;
use crate::invoker::EventHandlerInvoker;
use crate::token_store::{InMemoryTokenStore, TokenStore};
use worker::Instruction;

// =============================================================================
// Shared State
// =============================================================================

pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) owner: String,
    pub(crate) config: TrackingProcessorConfig,
    pub(crate) source: Arc<dyn EventSource>,
    pub(crate) token_store: Arc<dyn TokenStore>,
    pub(crate) invoker: EventHandlerInvoker,
    pub(crate) error_handler: Arc<dyn ErrorHandler>,
    pub(crate) blacklisting: AtomicBool,
    pub(crate) state: Mutex<State>,
}

#[derive(Default)]
pub(crate) struct State {
    running: bool,
    shutdown: Option<CancellationToken>,
    coordinator: Option<JoinHandle<()>>,
    pub(crate) workers: HashMap<u32, WorkerHandle>,
    /// Segments this instance will not claim before the given instant.
    pub(crate) backoff: HashMap<u32, Instant>,
    /// Last status of segments halted by a handler failure.
    pub(crate) failed: BTreeMap<u32, SegmentStatus>,
    /// Siblings of pending merges; never claimed until the merge completes.
    pub(crate) merging: HashSet<u32>,
    pub(crate) next_generation: u64,
}

pub(crate) struct WorkerHandle {
    pub(crate) generation: u64,
    pub(crate) segment: Segment,
    pub(crate) instructions: mpsc::UnboundedSender<Instruction>,
    pub(crate) status: Arc<Mutex<SegmentStatus>>,
    pub(crate) task: Option<JoinHandle<()>>,
}

// =============================================================================
// TrackingEventProcessor
// =============================================================================

/// Processes the event log in parallel segments.
///
/// Cloning is cheap; clones control the same processor.
#[derive(Clone)]
pub struct TrackingEventProcessor {
    shared: Arc<Shared>,
}

impl TrackingEventProcessor {
    /// Starts building a processor named `name` reading from `source`.
    pub fn builder(
        name: impl Into<String>,
        source: Arc<dyn EventSource>,
    ) -> TrackingEventProcessorBuilder {
        TrackingEventProcessorBuilder::new(name, source)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Identifier under which this instance claims segments.
    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    pub fn config(&self) -> &TrackingProcessorConfig {
        &self.shared.config
    }

    /// Subscribes a handler to events of `event_type`.
    ///
    /// Handlers may be added while the processor runs; they see events from
    /// the current position of each segment onwards.
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        origin: impl Into<String>,
        handler: BoxedHandler<EventMessage>,
    ) -> RegistrationHandle {
        self.shared.invoker.subscribe(event_type, origin, handler)
    }

    /// Adds an interceptor wrapping every handler invocation.
    pub fn register_handler_interceptor(
        &self,
        interceptor: BoxedHandlerInterceptor<EventMessage>,
    ) -> RegistrationHandle {
        self.shared.invoker.register_handler_interceptor(interceptor)
    }

    pub fn handlers(&self) -> Vec<HandlerDescriptor> {
        self.shared.invoker.handlers()
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn is_blacklisting(&self) -> bool {
        self.shared.blacklisting.load(Ordering::Relaxed)
    }

    /// Turns suppression of unhandled event types on or off. Workers pick up
    /// the change with their next batch.
    pub fn set_blacklisting(&self, enabled: bool) {
        self.shared.blacklisting.store(enabled, Ordering::Relaxed);
        debug!(processor = %self.shared.name, enabled, "Blacklisting toggled");
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Initializes the processor's segments if needed and starts claiming
    /// them. Does nothing if the processor is already running.
    pub async fn start(&self) -> ProcessorResult<()> {
        if self.is_running() {
            return Ok(());
        }

        let shared = &self.shared;
        let segments = Segment::initial_segments(shared.config.initial_segment_count)
            .ok_or_else(|| {
                ProcessorError::InvalidConfig(format!(
                    "cannot create {} initial segments",
                    shared.config.initial_segment_count
                ))
            })?;
        let token = match shared.config.initial_position {
            InitialPosition::Tail => TrackingToken::tail(),
            InitialPosition::Head => TrackingToken::at(shared.source.head()),
        };
        shared
            .token_store
            .initialize_segments(&shared.name, &segments, token)
            .await?;

        let cancel = CancellationToken::new();
        let mut state = shared.state.lock();
        if state.running {
            return Ok(());
        }
        let span = info_span!("coordinator", processor = %shared.name);
        let coordinator =
            tokio::spawn(coordinator::run(shared.clone(), cancel.clone()).instrument(span));
        state.running = true;
        state.shutdown = Some(cancel);
        state.coordinator = Some(coordinator);
        state.backoff.clear();
        drop(state);

        info!(processor = %shared.name, owner = %shared.owner, "Processor started");
        Ok(())
    }

    /// Stops every worker, storing their tokens and releasing their claims.
    pub async fn shutdown(&self) -> ProcessorResult<()> {
        let (cancel, coordinator) = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return Ok(());
            }
            state.running = false;
            (state.shutdown.take(), state.coordinator.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(coordinator) = coordinator {
            coordinator
                .await
                .map_err(|error| ProcessorError::Task(error.to_string()))?;
        }

        let tasks: Vec<_> = self
            .shared
            .state
            .lock()
            .workers
            .values_mut()
            .filter_map(|handle| handle.task.take())
            .collect();
        for result in join_all(tasks).await {
            result.map_err(|error| ProcessorError::Task(error.to_string()))?;
        }
        self.shared.state.lock().workers.clear();

        info!(processor = %self.shared.name, "Processor stopped");
        Ok(())
    }

    // =========================================================================
    // Segment Operations
    // =========================================================================

    /// Splits a segment owned by this instance in two. The worker keeps the
    /// first half; the second half becomes claimable.
    pub fn split_segment(&self, segment: u32) -> SegmentOperation<(Segment, Segment)> {
        let (reply, receiver) = oneshot::channel();
        match self.instruct(segment, Instruction::Split { reply }) {
            Ok(()) => SegmentOperation::pending(receiver),
            Err(error) => SegmentOperation::ready(Err(error)),
        }
    }

    /// Merges a segment owned by this instance with its sibling.
    ///
    /// If the sibling is processed by this instance too, its worker releases
    /// it first. A sibling claimed by another instance, or one that has itself
    /// been split, makes the merge fail.
    ///
    /// Must be called within a Tokio runtime.
    pub fn merge_segment(&self, segment: u32) -> SegmentOperation<Segment> {
        let (reply, receiver) = oneshot::channel();
        let processor = self.clone();
        let span = info_span!("merge", processor = %self.shared.name, segment);
        tokio::spawn(
            async move {
                let _ = reply.send(processor.merge(segment).await);
            }
            .instrument(span),
        );
        SegmentOperation::pending(receiver)
    }

    /// Stops processing a segment and gives up its claim. This instance
    /// leaves the segment alone for one claim interval.
    pub fn release_segment(&self, segment: u32) -> SegmentOperation<()> {
        let (reply, receiver) = oneshot::channel();
        match self.instruct(segment, Instruction::Release { reply }) {
            Ok(()) => SegmentOperation::pending(receiver),
            Err(error) => SegmentOperation::ready(Err(error)),
        }
    }

    async fn merge(&self, id: u32) -> SegmentResult<Segment> {
        let segment = self.owned_segment(id)?;
        let sibling = segment.sibling().ok_or(SegmentError::NoSibling(id))?;

        let blocked = self.shared.state.lock().merging.insert(sibling.id());
        let result = self.merge_with(id, sibling).await;
        if blocked {
            self.shared.state.lock().merging.remove(&sibling.id());
        }
        result
    }

    async fn merge_with(&self, id: u32, sibling: Segment) -> SegmentResult<Segment> {
        let local_sibling = self
            .shared
            .state
            .lock()
            .workers
            .get(&sibling.id())
            .filter(|handle| handle.segment == sibling)
            .map(|handle| handle.instructions.clone());
        if let Some(instructions) = local_sibling {
            debug!(%sibling, "Releasing sibling before merge");
            let (reply, receiver) = oneshot::channel();
            instructions
                .send(Instruction::Release { reply })
                .map_err(|_| SegmentError::Cancelled)?;
            receiver.await.map_err(|_| SegmentError::Cancelled)??;
        }

        let (reply, receiver) = oneshot::channel();
        self.instruct(id, Instruction::Merge { reply })?;
        receiver.await.map_err(|_| SegmentError::Cancelled)?
    }

    fn owned_segment(&self, id: u32) -> SegmentResult<Segment> {
        let state = self.shared.state.lock();
        if !state.running {
            return Err(SegmentError::ProcessorNotRunning(self.shared.name.clone()));
        }
        state
            .workers
            .get(&id)
            .map(|handle| handle.segment)
            .ok_or(SegmentError::NotOwned(id))
    }

    fn instruct(&self, id: u32, instruction: Instruction) -> SegmentResult<()> {
        let state = self.shared.state.lock();
        if !state.running {
            return Err(SegmentError::ProcessorNotRunning(self.shared.name.clone()));
        }
        state
            .workers
            .get(&id)
            .ok_or(SegmentError::NotOwned(id))?
            .instructions
            .send(instruction)
            .map_err(|_| SegmentError::NotOwned(id))
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Status of every segment this instance processes, plus the segments
    /// halted by a failure, ordered by segment id.
    pub fn status(&self) -> Vec<SegmentStatus> {
        let state = self.shared.state.lock();
        let mut statuses: Vec<SegmentStatus> = state
            .workers
            .values()
            .map(|handle| handle.status.lock().clone())
            .chain(
                state
                    .failed
                    .iter()
                    .filter(|(id, _)| !state.workers.contains_key(id))
                    .map(|(_, status)| status.clone()),
            )
            .collect();
        statuses.sort_by_key(|status| status.segment.id());
        statuses
    }
}

impl std::fmt::Debug for TrackingEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingEventProcessor")
            .field("name", &self.shared.name)
            .field("owner", &self.shared.owner)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`TrackingEventProcessor`].
pub struct TrackingEventProcessorBuilder {
    name: String,
    source: Arc<dyn EventSource>,
    token_store: Option<Arc<dyn TokenStore>>,
    config: TrackingProcessorConfig,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    invoker: EventHandlerInvoker,
}

impl TrackingEventProcessorBuilder {
    fn new(name: impl Into<String>, source: Arc<dyn EventSource>) -> Self {
        Self {
            name: name.into(),
            source,
            token_store: None,
            config: TrackingProcessorConfig::default(),
            error_handler: None,
            invoker: EventHandlerInvoker::new(),
        }
    }

    /// Uses `store` for segments and tokens. Defaults to a fresh
    /// [`InMemoryTokenStore`].
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn config(mut self, config: TrackingProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the error handler selected by the config's error mode.
    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn subscribe(
        self,
        event_type: impl Into<String>,
        origin: impl Into<String>,
        handler: BoxedHandler<EventMessage>,
    ) -> Self {
        let _ = self.invoker.subscribe(event_type, origin, handler);
        self
    }

    pub fn handler_interceptor(self, interceptor: BoxedHandlerInterceptor<EventMessage>) -> Self {
        let _ = self.invoker.register_handler_interceptor(interceptor);
        self
    }

    pub fn build(self) -> ProcessorResult<TrackingEventProcessor> {
        self.config.validate()?;
        let owner = format!("{}@{}", self.name, Uuid::now_v7());
        let error_handler = self
            .error_handler
            .unwrap_or_else(|| self.config.error_mode.into_handler());
        let token_store = self
            .token_store
            .unwrap_or_else(|| Arc::new(InMemoryTokenStore::default()));

        Ok(TrackingEventProcessor {
            shared: Arc::new(Shared {
                blacklisting: AtomicBool::new(self.config.blacklisting),
                name: self.name,
                owner,
                config: self.config,
                source: self.source,
                token_store,
                invoker: self.invoker,
                error_handler,
                state: Mutex::new(State::default()),
            }),
        })
    }
}
