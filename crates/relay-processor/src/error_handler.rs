//! What happens when an event handler fails inside a processor.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use relay_core::{DispatchError, Segment, TrackedEventMessage};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Details of one handler failure.
#[derive(Debug)]
pub struct ErrorContext<'a> {
    pub processor: &'a str,
    pub segment: Segment,
    pub event: &'a TrackedEventMessage,
    /// Origin of the handler that failed.
    pub handler: &'a str,
    pub error: &'a DispatchError,
}

/// Decides whether a handler failure stops the segment.
///
/// Returning `Ok` skips the failed event. Returning an error makes the worker
/// release its segment without advancing past the event; the segment is
/// claimed again after the retry backoff and the event is redelivered.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle_error(&self, context: &ErrorContext<'_>) -> Result<(), DispatchError>;
}

/// Logs the failure and continues with the next event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle_error(&self, context: &ErrorContext<'_>) -> Result<(), DispatchError> {
        error!(
            processor = context.processor,
            segment = %context.segment,
            index = context.event.index(),
            event = context.event.message().event_type(),
            handler = context.handler,
            error = %context.error,
            "Event handler failed, skipping event"
        );
        Ok(())
    }
}

/// Propagates the failure, halting the segment until it is retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropagatingErrorHandler;

impl ErrorHandler for PropagatingErrorHandler {
    fn handle_error(&self, context: &ErrorContext<'_>) -> Result<(), DispatchError> {
        error!(
            processor = context.processor,
            segment = %context.segment,
            index = context.event.index(),
            event = context.event.message().event_type(),
            handler = context.handler,
            error = %context.error,
            "Event handler failed, halting segment"
        );
        Err(context.error.clone())
    }
}

/// Configuration-level selection of an error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    #[default]
    Log,
    Propagate,
}

impl ErrorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Propagate => "propagate",
        }
    }

    pub fn into_handler(self) -> Arc<dyn ErrorHandler> {
        match self {
            Self::Log => Arc::new(LoggingErrorHandler),
            Self::Propagate => Arc::new(PropagatingErrorHandler),
        }
    }
}

impl fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" | "logging" => Ok(Self::Log),
            "propagate" | "propagating" => Ok(Self::Propagate),
            other => Err(format!("unknown error mode '{other}', expected log or propagate")),
        }
    }
}
