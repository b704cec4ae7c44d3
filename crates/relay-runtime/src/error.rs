//! Runtime error types.

use relay_core::{RegistrationError, SegmentError};
use relay_processor::ProcessorError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A handler registration was rejected.
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// No processor with this name is registered.
    #[error("Processor not found: {0}")]
    ProcessorNotFound(String),

    /// A processor with this name is already registered.
    #[error("Processor already registered: {0}")]
    ProcessorExists(String),

    /// A processor failed to start or stop.
    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    /// A split, merge or release was refused.
    #[error("Segment operation failed: {0}")]
    Segment(#[from] SegmentError),

    /// Listening for shutdown signals failed.
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
