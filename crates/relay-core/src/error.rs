//! Error types for the Relay core.
//!
//! Bus- and processor-level errors are defined here so that every crate in
//! the workspace reports failures with the same vocabulary.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::message::Payload;

/// A boxed, thread-safe error, the same shape tower uses for service errors.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// =============================================================================
// Handler Errors
// =============================================================================

/// A failure raised by a handler.
///
/// The underlying error is kept behind an `Arc`, so a `HandlerError` can be
/// cloned into scatter-gather entries and processor status reports while
/// exception interceptors still downcast the original value.
#[derive(Clone)]
pub struct HandlerError {
    source: Arc<dyn StdError + Send + Sync + 'static>,
}

impl HandlerError {
    /// Wraps any error.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(error),
        }
    }

    /// Creates a handler error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::from_boxed(message.into())
    }

    /// Wraps an already boxed error.
    ///
    /// A boxed `HandlerError` is unwrapped rather than nested, so downcasting
    /// keeps reaching the original error.
    pub fn from_boxed(error: BoxError) -> Self {
        match error.downcast::<HandlerError>() {
            Ok(handler_error) => *handler_error,
            Err(error) => Self {
                source: Arc::from(error),
            },
        }
    }

    /// Borrows the underlying error as `E`, if that is its concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    /// Returns `true` if the underlying error is an `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.source.is::<E>()
    }

    /// Borrows the underlying error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.source
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.source, f)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.source, f)
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.source()
    }
}

impl From<BoxError> for HandlerError {
    fn from(error: BoxError) -> Self {
        Self::from_boxed(error)
    }
}

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors returned to the caller of a bus.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// No handler is registered for the message.
    #[error("no handler for '{discriminator}'")]
    NoHandler {
        /// Command name, query name or event type.
        discriminator: String,
    },

    /// A dispatch interceptor refused the message.
    #[error("dispatch vetoed: {reason}")]
    Vetoed {
        /// Reason given by the interceptor.
        reason: String,
    },

    /// The handler (or an interceptor around it) failed.
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// A handler did not answer within its time budget.
    #[error("handler '{handler}' timed out after {timeout:?}")]
    Timeout {
        /// Origin of the handler that timed out.
        handler: String,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The task running the handler was cancelled or panicked.
    #[error("handler execution aborted: {0}")]
    Aborted(String),
}

impl DispatchError {
    /// Creates a veto error.
    pub fn vetoed(reason: impl Into<String>) -> Self {
        Self::Vetoed {
            reason: reason.into(),
        }
    }

    /// Creates a no-handler error.
    pub fn no_handler(discriminator: impl Into<String>) -> Self {
        Self::NoHandler {
            discriminator: discriminator.into(),
        }
    }

    /// Wraps any error as a handler failure.
    pub fn handler<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Handler(HandlerError::new(error))
    }

    /// Returns the handler failure, if this is one.
    pub fn as_handler_error(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler(error) => Some(error),
            _ => None,
        }
    }
}

// =============================================================================
// Registration Errors
// =============================================================================

/// Errors raised when installing a handler.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// A second handler for the same command was rejected.
    #[error(
        "duplicate handler for '{name}': '{candidate_origin}' rejected, \
         '{existing_origin}' is already registered"
    )]
    DuplicateHandler {
        name: String,
        existing_origin: String,
        candidate_origin: String,
    },
}

// =============================================================================
// Segment Errors
// =============================================================================

/// Errors raised by segment split, merge and release requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    /// This instance does not own or is not actively processing the segment.
    #[error("segment {0} is not owned by this instance")]
    NotOwned(u32),

    /// The segment cannot be divided any further.
    #[error("segment {0} is already at minimum granularity")]
    AtMinimumGranularity(u32),

    /// The root segment has no sibling to merge with.
    #[error("segment {0} covers the whole key space and has no sibling")]
    NoSibling(u32),

    /// The sibling has been split further and no longer exists as one segment.
    #[error("sibling {sibling} of segment {segment} does not exist")]
    SiblingNotFound { segment: u32, sibling: u32 },

    /// The sibling is claimed by another owner.
    #[error("sibling {sibling} is claimed by '{owner}'")]
    SiblingClaimed { sibling: u32, owner: String },

    /// The tokens of the two halves cannot be combined.
    #[error("tracking positions of segments {0} and {1} cannot be reconciled")]
    PositionsIrreconcilable(u32, u32),

    /// The segment is not known to the token store.
    #[error("segment {0} does not exist")]
    UnknownSegment(u32),

    /// The processor is not running.
    #[error("processor '{0}' is not running")]
    ProcessorNotRunning(String),

    /// The owning worker stopped before applying the request.
    #[error("segment request was cancelled")]
    Cancelled,

    /// The token store failed.
    #[error("token store error: {0}")]
    Store(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result of dispatching a message through a bus.
pub type DispatchResult<T = Payload> = Result<T, DispatchError>;

/// Result type for handler registration.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Result type for segment operations.
pub type SegmentResult<T> = Result<T, SegmentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("card {0} is expired")]
    struct CardExpired(String);

    #[test]
    fn test_handler_error_downcast() {
        let error = HandlerError::new(CardExpired("gc-1".into()));
        assert!(error.is::<CardExpired>());
        assert_eq!(error.downcast_ref::<CardExpired>().map(|e| e.0.as_str()), Some("gc-1"));
        assert_eq!(error.to_string(), "card gc-1 is expired");

        let cloned = error.clone();
        assert!(cloned.is::<CardExpired>());
    }

    #[test]
    fn test_handler_error_from_message() {
        let error = HandlerError::msg("boom");
        assert_eq!(error.to_string(), "boom");
        assert!(!error.is::<CardExpired>());
    }

    #[test]
    fn test_dispatch_error_display() {
        let error = DispatchError::no_handler("RedeemCard");
        assert_eq!(error.to_string(), "no handler for 'RedeemCard'");

        let error = DispatchError::handler(CardExpired("gc-2".into()));
        assert!(error.as_handler_error().is_some_and(|e| e.is::<CardExpired>()));
    }
}
