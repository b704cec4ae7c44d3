//! Configuration module for the Relay runtime.
//!
//! This module provides figment-based loading and validation of the bus,
//! event store, token store and processor settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    CommandBusConfig, EventStoreConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    ProcessorConfig, QueryBusConfig, RelayConfig, SpanEventConfig, TokenStoreConfig,
};
pub use validation::validate_config;
