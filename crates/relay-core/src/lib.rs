//! # Relay Core
//!
//! The building blocks shared by every Relay bus and processor.
//!
//! ## Contents
//!
//! - **Messages**: immutable envelopes with type-erased payloads and
//!   metadata ([`CommandMessage`], [`EventMessage`], [`QueryMessage`])
//! - **Handlers**: async functions erased into [`BoxedHandler`]s via
//!   [`into_handler`]
//! - **Interceptors**: dispatch-stage rewriting and vetoing
//!   ([`DispatchInterceptor`]) and handler-stage wrapping
//!   ([`HandlerInterceptor`], [`InterceptorChain`])
//! - **Registries**: copy-on-write handler tables with pluggable duplicate
//!   resolution for commands ([`DuplicateCommandHandlerResolver`])
//! - **Segments**: partitioning of the routing key space ([`Segment`]) and
//!   per-segment read positions ([`TrackingToken`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_core::{CommandHandlerRegistry, CommandMessage, into_handler};
//!
//! let registry = CommandHandlerRegistry::default();
//! registry.register(
//!     "RedeemCard",
//!     "gift-card-aggregate",
//!     into_handler(|command: CommandMessage| async move {
//!         let card = command.payload_as::<RedeemCard>().ok_or("unexpected payload")?;
//!         Ok::<_, BoxError>(card.amount)
//!     }),
//! )?;
//!
//! let handler = registry.resolve("RedeemCard").expect("registered above");
//! ```

pub mod error;
pub mod handler;
pub mod interceptor;
pub mod message;
pub mod registry;
pub mod segment;
pub mod token;

pub use error::{
    BoxError, DispatchError, DispatchResult, HandlerError, RegistrationError, RegistrationResult,
    SegmentError, SegmentResult,
};
pub use handler::{BoxFuture, BoxedHandler, ErasedHandler, HandlerFn, HandlerResult, into_handler};
pub use interceptor::{
    BoxedHandlerInterceptor, DispatchInterceptor, ExceptionInterceptor, HandlerInterceptor,
    InterceptorChain, apply_dispatch_interceptors, chain, dispatch_interceptor,
    handler_interceptor,
};
pub use message::{
    AggregateRef, CAUSATION_ID, CORRELATION_ID, Cardinality, CommandMessage, EventMessage,
    GenericMessage, Message, MetaData, Payload, QueryMessage, QueryResponse, ResponseType,
    TrackedEventMessage,
};
pub use registry::{
    Canceller, CommandHandlerRegistry, CommandRegistration, DuplicateCommandHandlerResolver,
    DuplicateResolution, EventHandlerRegistry, EventRegistration, HandlerDescriptor, HandlerKind,
    LogAndKeepExisting, QueryHandlerRegistry, QueryRegistration, RegistrationHandle,
    RegistrationId, RejectDuplicates, ReplaceExisting, UnknownResolution,
};
pub use segment::{Segment, covers_key_space, hash_routing_key};
pub use token::TrackingToken;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        BoxError, CommandMessage, DispatchError, DispatchResult, EventMessage, HandlerError,
        HandlerInterceptor, InterceptorChain, Message, MetaData, Payload, QueryMessage,
        ResponseType, into_handler,
    };
}
