//! # Relay Framework
//!
//! Message buses built on the Relay core:
//!
//! - [`SimpleCommandBus`] - one handler per command, duplicate resolution at
//!   subscription time, inline or spawned execution
//! - [`SimpleQueryBus`] - point-to-point and scatter-gather queries with
//!   per-handler timeouts
//! - [`InMemoryEventStore`] - an [`EventBus`] and [`EventSource`] backed by an
//!   in-memory log, with per-stream suppression of unhandled event types
//!
//! All buses implement `tower::Service`.

pub mod command;
pub mod event;
pub mod interceptors;
pub mod query;
pub mod service;

pub use command::{CommandBusBuilder, Execution, SimpleCommandBus};
pub use event::{
    DEFAULT_SUPPRESSION_REFRESH, EventBus, EventSource, EventStream, InMemoryEventStore,
    InMemoryEventStream,
};
pub use interceptors::InterceptorList;
pub use query::{DEFAULT_HANDLER_TIMEOUT, ScatterGatherEntry, SimpleQueryBus};
