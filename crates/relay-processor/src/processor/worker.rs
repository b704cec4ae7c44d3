//! The per-segment worker loop.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use relay_core::{
    DispatchError, Segment, SegmentError, SegmentResult, TrackingToken, hash_routing_key,
};
use relay_framework::EventStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Shared, SegmentStatus};
use crate::error_handler::ErrorContext;

/// A request applied by a worker at its next safe point.
pub(crate) enum Instruction {
    Split {
        reply: oneshot::Sender<SegmentResult<(Segment, Segment)>>,
    },
    Merge {
        reply: oneshot::Sender<SegmentResult<Segment>>,
    },
    Release {
        reply: oneshot::Sender<SegmentResult<()>>,
    },
}

enum Step {
    Shutdown,
    Instruction(Option<Instruction>),
    Poll(bool),
}

enum Exit {
    Shutdown,
    Released(oneshot::Sender<SegmentResult<()>>),
    Failed(DispatchError),
    ClaimLost,
}

pub(crate) struct Worker {
    pub(crate) shared: Arc<Shared>,
    pub(crate) generation: u64,
    pub(crate) segment: Segment,
    pub(crate) token: TrackingToken,
    pub(crate) instructions: mpsc::UnboundedReceiver<Instruction>,
    pub(crate) status: Arc<Mutex<SegmentStatus>>,
    pub(crate) cancel: CancellationToken,
}

impl Worker {
    pub(crate) async fn run(mut self) {
        info!(position = self.token.position(), "Worker started");
        let idle_poll = self.shared.config.idle_poll;
        let mut stream = self.shared.source.open_stream(self.token.position());

        let exit = loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Shutdown,
                instruction = self.instructions.recv() => Step::Instruction(instruction),
                available = stream.has_next_available(idle_poll) => Step::Poll(available),
            };

            match step {
                Step::Shutdown | Step::Instruction(None) => break Exit::Shutdown,
                Step::Instruction(Some(instruction)) => {
                    if let Some(exit) = self.apply(instruction, &mut stream).await {
                        break exit;
                    }
                }
                Step::Poll(available) => {
                    if available {
                        if let Err(error) = self.process_batch(stream.as_mut()).await {
                            break Exit::Failed(error);
                        }
                    }
                    if !self.checkpoint(stream.position()).await {
                        break Exit::ClaimLost;
                    }
                }
            }
        };

        self.finish(exit).await;
    }

    /// Handles up to one batch of events, advancing the token past every
    /// event that is handled, skipped or suppressed.
    async fn process_batch(&mut self, stream: &mut dyn EventStream) -> Result<(), DispatchError> {
        let blacklisting = self.shared.blacklisting.load(Ordering::Relaxed);
        if !blacklisting && !stream.suppressed().is_empty() {
            debug!("Blacklisting disabled, offering suppressed event types again");
            stream.clear_suppressed();
        }

        for _ in 0..self.shared.config.batch_size {
            let Some(event) = stream.try_next() else {
                break;
            };
            let index = event.index();
            let message = event.message();
            let hash = hash_routing_key(message.routing_key().as_bytes());

            if !self.segment.matches(hash) || self.token.covers(index, hash) {
                self.token = self.token.advanced_to(index);
                continue;
            }

            if !self.shared.invoker.can_handle(message.event_type()) {
                if blacklisting {
                    debug!(event = message.event_type(), "No handler for event type, suppressing");
                    stream.suppress(message.event_type());
                }
                self.token = self.token.advanced_to(index);
                continue;
            }

            trace!(index, event = message.event_type(), "Handling event");
            let failures = self.shared.invoker.handle(message, self.segment).await;
            for failure in &failures {
                let context = ErrorContext {
                    processor: &self.shared.name,
                    segment: self.segment,
                    event: &event,
                    handler: &failure.handler,
                    error: &failure.error,
                };
                self.shared.error_handler.handle_error(&context)?;
            }
            self.token = self.token.advanced_to(index);
        }

        // Events skipped by suppression never surface through `try_next`.
        if let Some(last) = stream.position().checked_sub(1) {
            self.token = self.token.advanced_to(last);
        }
        Ok(())
    }

    /// Persists the token, refreshing the claim. Returns `false` if the
    /// claim has been lost.
    async fn checkpoint(&mut self, position: u64) -> bool {
        if let Err(error) = self.store_token().await {
            warn!(%error, "Lost claim on segment");
            return false;
        }
        let caught_up = position >= self.shared.source.head();
        let mut status = self.status.lock();
        status.segment = self.segment;
        status.token = self.token;
        status.caught_up = caught_up;
        true
    }

    async fn store_token(&self) -> SegmentResult<()> {
        self.shared
            .token_store
            .store_token(&self.shared.name, self.segment.id(), &self.shared.owner, self.token)
            .await
            .map_err(SegmentError::from)
    }

    async fn apply(
        &mut self,
        instruction: Instruction,
        stream: &mut Box<dyn EventStream>,
    ) -> Option<Exit> {
        match instruction {
            Instruction::Split { reply } => {
                let result = self.split().await;
                let _ = reply.send(result);
                None
            }
            Instruction::Merge { reply } => {
                let result = self.merge(stream).await;
                let _ = reply.send(result);
                None
            }
            Instruction::Release { reply } => Some(Exit::Released(reply)),
        }
    }

    async fn split(&mut self) -> SegmentResult<(Segment, Segment)> {
        self.store_token().await?;
        let (kept, handed_off) = self
            .shared
            .token_store
            .split(&self.shared.name, self.segment.id(), &self.shared.owner)
            .await?;
        info!(%kept, %handed_off, "Segment split");

        self.segment = kept;
        self.status.lock().segment = kept;
        if let Some(handle) = self.shared.state.lock().workers.get_mut(&kept.id()) {
            handle.segment = kept;
        }
        Ok((kept, handed_off))
    }

    async fn merge(&mut self, stream: &mut Box<dyn EventStream>) -> SegmentResult<Segment> {
        let sibling = self
            .segment
            .sibling()
            .ok_or(SegmentError::NoSibling(self.segment.id()))?;
        if self.shared.state.lock().workers.contains_key(&sibling.id()) {
            return Err(SegmentError::SiblingClaimed {
                sibling: sibling.id(),
                owner: self.shared.owner.clone(),
            });
        }

        self.store_token().await?;
        let entry = self
            .shared
            .token_store
            .merge(&self.shared.name, self.segment.id(), &self.shared.owner)
            .await?;
        info!(merged = %entry.segment, token = ?entry.token, "Segment merged");

        let previous = self.segment.id();
        self.segment = entry.segment;
        self.token = entry.token;
        *stream = self.shared.source.open_stream(self.token.position());
        {
            let mut status = self.status.lock();
            status.segment = self.segment;
            status.token = self.token;
            status.caught_up = false;
        }

        let mut state = self.shared.state.lock();
        if let Some(mut handle) = state.workers.remove(&previous) {
            handle.segment = self.segment;
            state.backoff.remove(&self.segment.id());
            state.workers.insert(self.segment.id(), handle);
        }
        Ok(self.segment)
    }

    async fn finish(self, exit: Exit) {
        let id = self.segment.id();
        let mut error = None;

        match &exit {
            Exit::Released(_) => {
                let until = Instant::now() + self.shared.config.claim_interval;
                self.shared.state.lock().backoff.insert(id, until);
            }
            Exit::Failed(failure) => {
                warn!(
                    error = %failure,
                    position = self.token.position(),
                    "Segment halted by handler failure"
                );
                let until = Instant::now() + self.shared.config.retry_backoff;
                self.shared.state.lock().backoff.insert(id, until);
                error = Some(failure.to_string());
            }
            Exit::Shutdown | Exit::ClaimLost => {}
        }

        let released = match exit {
            Exit::ClaimLost => Ok(()),
            _ => self.release().await,
        };
        if let Err(error) = &released {
            warn!(%error, "Failed to release segment");
        }

        {
            let mut state = self.shared.state.lock();
            let owned = state
                .workers
                .get(&id)
                .is_some_and(|handle| handle.generation == self.generation);
            if owned {
                state.workers.remove(&id);
            }
            if let Some(error) = error {
                let mut status = self.status.lock().clone();
                status.token = self.token;
                status.active = false;
                status.caught_up = false;
                status.error = Some(error);
                state.failed.insert(id, status);
            }
        }

        if let Exit::Released(reply) = exit {
            let _ = reply.send(released);
        }
        info!(position = self.token.position(), "Worker stopped");
    }

    async fn release(&self) -> SegmentResult<()> {
        self.store_token().await?;
        self.shared
            .token_store
            .release(&self.shared.name, self.segment.id(), &self.shared.owner)
            .await
            .map_err(SegmentError::from)
    }
}
