//! Error types for the tracking event processor.

use relay_core::SegmentError;
use thiserror::Error;

// =============================================================================
// Token Store Errors
// =============================================================================

/// Errors raised by a [`TokenStore`](crate::TokenStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenStoreError {
    /// No segments have been initialized for the processor.
    #[error("no segments initialized for processor '{0}'")]
    NotInitialized(String),

    /// The segment does not exist.
    #[error("segment {segment} of processor '{processor}' does not exist")]
    UnknownSegment { processor: String, segment: u32 },

    /// Another owner holds a live claim on the segment.
    #[error("segment {segment} is claimed by '{owner}'")]
    ClaimedByOther { segment: u32, owner: String },

    /// The caller does not hold the claim it needs.
    #[error("segment {segment} is not claimed by '{owner}'")]
    NotOwner { segment: u32, owner: String },

    /// A segment-level precondition failed.
    #[error(transparent)]
    Segment(#[from] SegmentError),
}

impl From<TokenStoreError> for SegmentError {
    fn from(error: TokenStoreError) -> Self {
        match error {
            TokenStoreError::UnknownSegment { segment, .. } => {
                SegmentError::UnknownSegment(segment)
            }
            TokenStoreError::NotOwner { segment, .. } => SegmentError::NotOwned(segment),
            TokenStoreError::ClaimedByOther { segment, owner } => SegmentError::SiblingClaimed {
                sibling: segment,
                owner,
            },
            TokenStoreError::Segment(error) => error,
            other => SegmentError::Store(other.to_string()),
        }
    }
}

// =============================================================================
// Processor Errors
// =============================================================================

/// Errors raised by processor lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    /// The configuration is invalid.
    #[error("invalid processor configuration: {0}")]
    InvalidConfig(String),

    /// The token store failed.
    #[error("token store error: {0}")]
    TokenStore(#[from] TokenStoreError),

    /// A worker or coordinator task failed to shut down cleanly.
    #[error("processor task failed: {0}")]
    Task(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for token store operations.
pub type TokenStoreResult<T> = Result<T, TokenStoreError>;

/// Result type for processor lifecycle operations.
pub type ProcessorResult<T> = Result<T, ProcessorError>;
