//! # Relay Processor
//!
//! Tracking event processing for Relay:
//!
//! - [`TrackingEventProcessor`] - consumes the event log in parallel
//!   segments, one worker per claimed segment
//! - [`TokenStore`] - persists segments, tracking tokens and claims;
//!   [`InMemoryTokenStore`] keeps them in process memory
//! - [`ErrorHandler`] - decides whether a failing handler halts its segment
//!
//! Segments can be split, merged and released at runtime without losing or
//! duplicating events; see the [`processor`] module.

pub mod config;
pub mod error;
pub mod error_handler;
pub mod invoker;
pub mod processor;
pub mod token_store;

pub use config::{InitialPosition, TrackingProcessorConfig};
pub use error::{ProcessorError, ProcessorResult, TokenStoreError, TokenStoreResult};
pub use error_handler::{
    ErrorContext, ErrorHandler, ErrorMode, LoggingErrorHandler, PropagatingErrorHandler,
};
pub use invoker::{EventHandlerInvoker, HandlerFailure, current_segment};
pub use processor::{
    SegmentOperation, SegmentStatus, TrackingEventProcessor, TrackingEventProcessorBuilder,
};
pub use token_store::{DEFAULT_CLAIM_TIMEOUT, InMemoryTokenStore, SegmentEntry, TokenStore};
