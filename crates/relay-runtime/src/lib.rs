//! Relay Runtime - configuration, logging and wiring for Relay applications.
//!
//! This crate provides:
//! - Figment-based configuration loading (`ConfigLoader`, `RelayConfig`)
//! - Logging setup (`LoggingBuilder`)
//! - The runtime (`RelayRuntime`) owning the buses, the event store and the
//!   tracking processors, with administration operations for handlers and
//!   segments
//!
//! ```rust,ignore
//! use relay_runtime::RelayRuntime;
//!
//! #[tokio::main]
//! async fn main() -> relay_runtime::RuntimeResult<()> {
//!     let runtime = RelayRuntime::builder().profile("production").build()?;
//!     // subscribe handlers, register processors...
//!     runtime.run().await
//! }
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use admin::{HandlerOverview, ProcessorReport};
pub use config::{ConfigError, ConfigLoader, ConfigResult, ProcessorConfig, RelayConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{RelayRuntime, RuntimeBuilder};

// Re-export tracing for use by applications
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
