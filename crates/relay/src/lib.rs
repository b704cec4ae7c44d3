//! # Relay
//!
//! Command, query and event messaging for Rust services.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  dispatch   ┌─────────────────┐
//! │ Command bus  │────────────▶│ one handler     │──▶ publishes events
//! └──────────────┘             └─────────────────┘          │
//! ┌──────────────┐  query      ┌─────────────────┐          ▼
//! │ Query bus    │────────────▶│ one / all (S-G) │   ┌─────────────┐
//! └──────────────┘             └─────────────────┘   │ Event store │
//!                                                    └──────┬──────┘
//!                        ┌──────────────────────────────────┘
//!                        ▼
//!           ┌───────────────────────────┐
//!           │ Tracking event processor  │  segment 0 ─ worker
//!           │ (claims segments)         │  segment 1 ─ worker
//!           └───────────────────────────┘  ...
//! ```
//!
//! - **Messages**: immutable envelopes with identifier, timestamp, payload
//!   and metadata
//! - **Interceptors**: dispatch interceptors run before routing, handler
//!   interceptors wrap each invocation and decide whether to proceed
//! - **Command bus**: exactly one handler per command name; duplicates are
//!   resolved by a configurable policy
//! - **Query bus**: point-to-point or scatter-gather with per-handler timeouts
//! - **Tracking processors**: consume the event log in segments that can be
//!   split and merged at runtime
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> relay::runtime::RuntimeResult<()> {
//!     let runtime = RelayRuntime::new();
//!
//!     runtime.command_bus().subscribe(
//!         "RedeemCard",
//!         "GiftCardHandler",
//!         into_handler(|command: CommandMessage| async move {
//!             Ok::<_, HandlerError>(())
//!         }),
//!     )?;
//!
//!     runtime.run().await
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use relay_core as core;
pub use relay_framework as framework;
pub use relay_processor as processor;
pub use relay_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use relay::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use relay_runtime::{RelayConfig, RelayRuntime};

    // Messages, handlers and interceptors
    pub use relay_core::prelude::*;
    pub use relay_core::{
        DuplicateResolution, RegistrationHandle, Segment, dispatch_interceptor,
        handler_interceptor,
    };

    // Buses
    pub use relay_framework::{EventBus, SimpleCommandBus, SimpleQueryBus};

    // Event processing
    pub use relay_processor::{
        ErrorMode, TrackingEventProcessor, TrackingProcessorConfig, current_segment,
    };
}
