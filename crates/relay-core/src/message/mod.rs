//! Message envelopes.
//!
//! Every message that flows through a bus is an immutable envelope made of a
//! [`GenericMessage`] (identifier, timestamp, payload, metadata) plus a
//! variant-specific discriminator:
//!
//! - [`CommandMessage`] - routed by command name to exactly one handler
//! - [`EventMessage`] - routed by event type to zero or more handlers
//! - [`QueryMessage`] - routed by query name and [`ResponseType`]
//!
//! Envelopes are never mutated in place. Interceptors that want to change a
//! message build a new one through [`Message::with_metadata`] or
//! [`Message::and_metadata`] and hand that to the next stage.

mod command;
mod event;
mod metadata;
mod payload;
mod query;

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub use command::CommandMessage;
pub use event::{AggregateRef, EventMessage, TrackedEventMessage};
pub use metadata::{CAUSATION_ID, CORRELATION_ID, MetaData};
pub use payload::Payload;
pub use query::{Cardinality, QueryMessage, QueryResponse, ResponseType};

// ============================================================================
// GenericMessage
// ============================================================================

/// The shared part of every message: identity, creation time, payload and metadata.
#[derive(Debug, Clone)]
pub struct GenericMessage {
    identifier: Uuid,
    timestamp: DateTime<Utc>,
    payload: Payload,
    metadata: Arc<MetaData>,
}

impl GenericMessage {
    /// Creates a message with a fresh time-ordered identifier and empty metadata.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self::from_payload(Payload::new(payload))
    }

    /// Creates a message around an already type-erased payload.
    pub fn from_payload(payload: Payload) -> Self {
        Self {
            identifier: Uuid::now_v7(),
            timestamp: Utc::now(),
            payload,
            metadata: Arc::new(MetaData::new()),
        }
    }

    /// Rebuilds a message from stored parts, keeping its identity.
    pub fn from_parts(
        identifier: Uuid,
        timestamp: DateTime<Utc>,
        payload: Payload,
        metadata: MetaData,
    ) -> Self {
        Self {
            identifier,
            timestamp,
            payload,
            metadata: Arc::new(metadata),
        }
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    fn replace_metadata(mut self, metadata: MetaData) -> Self {
        self.metadata = Arc::new(metadata);
        self
    }
}

// ============================================================================
// Message trait
// ============================================================================

/// Common behaviour of command, event and query envelopes.
///
/// Implementors only provide access to their [`GenericMessage`] and the
/// discriminator used for routing; everything else is derived.
pub trait Message: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Returns the shared envelope.
    fn generic(&self) -> &GenericMessage;

    /// Returns a copy of this message with the shared envelope replaced.
    fn map_generic<F>(self, f: F) -> Self
    where
        F: FnOnce(GenericMessage) -> GenericMessage;

    /// Returns the routing discriminator (command name, event type or query name).
    fn discriminator(&self) -> &str;

    fn identifier(&self) -> Uuid {
        self.generic().identifier()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.generic().timestamp()
    }

    fn payload(&self) -> &Payload {
        self.generic().payload()
    }

    fn metadata(&self) -> &MetaData {
        self.generic().metadata()
    }

    /// Borrows the payload as a `T`, if that is its concrete type.
    fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload().downcast_ref::<T>()
    }

    /// Returns a copy whose metadata is replaced by `metadata`.
    fn with_metadata(self, metadata: MetaData) -> Self {
        self.map_generic(|generic| generic.replace_metadata(metadata))
    }

    /// Returns a copy whose metadata has `metadata` merged on top.
    fn and_metadata(self, metadata: MetaData) -> Self {
        self.map_generic(|generic| {
            let merged = generic.metadata().clone().merged_with(&metadata);
            generic.replace_metadata(merged)
        })
    }

    /// Returns a copy carrying correlation data derived from `parent`.
    ///
    /// The correlation id is inherited from the parent (or is the parent's
    /// identifier when the parent starts a new flow); the causation id is the
    /// parent's identifier.
    fn caused_by<P: Message>(self, parent: &P) -> Self {
        let correlation = parent
            .metadata()
            .get(CORRELATION_ID)
            .cloned()
            .unwrap_or_else(|| Value::String(parent.identifier().to_string()));
        self.and_metadata(
            MetaData::with(CORRELATION_ID, correlation)
                .and(CAUSATION_ID, parent.identifier().to_string()),
        )
    }
}
