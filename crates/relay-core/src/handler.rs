//! Type-erased message handlers.
//!
//! A handler is any async function taking a message and returning
//! `Result<R, E>`. [`into_handler`] erases the result type into a
//! [`Payload`] and the error type into a [`HandlerError`], so handlers of
//! different shapes can share one registry.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_core::{CommandMessage, Message, into_handler};
//!
//! let handler = into_handler(|command: CommandMessage| async move {
//!     let card = command.payload_as::<RedeemCard>().ok_or("unexpected payload")?;
//!     Ok::<_, BoxError>(card.amount)
//! });
//! ```

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

pub use futures::future::BoxFuture;

use crate::error::{BoxError, HandlerError};
use crate::message::Payload;

/// Result produced by a type-erased handler.
pub type HandlerResult = Result<Payload, HandlerError>;

// ============================================================================
// ErasedHandler
// ============================================================================

/// A handler for messages of type `M` with its result type erased.
pub trait ErasedHandler<M>: Send + Sync {
    /// Handles the message.
    fn call(&self, message: M) -> BoxFuture<'static, HandlerResult>;
}

/// A type-erased handler that can be stored in registries.
pub type BoxedHandler<M> = Arc<dyn ErasedHandler<M>>;

/// Wraps an async function as an [`ErasedHandler`].
pub struct HandlerFn<F, R, E> {
    f: F,
    _marker: PhantomData<fn() -> (R, E)>,
}

impl<F, R, E> HandlerFn<F, R, E> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<M, F, Fut, R, E> ErasedHandler<M> for HandlerFn<F, R, E>
where
    F: Fn(M) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Any + Send + Sync,
    E: Into<BoxError> + 'static,
{
    fn call(&self, message: M) -> BoxFuture<'static, HandlerResult> {
        let future = (self.f)(message);
        Box::pin(async move {
            future
                .await
                .map(Payload::new)
                .map_err(|error| HandlerError::from_boxed(error.into()))
        })
    }
}

/// Converts an async function into a boxed handler.
///
/// Returning a [`Payload`] passes it through unchanged; any other value is
/// wrapped.
pub fn into_handler<M, F, Fut, R, E>(f: F) -> BoxedHandler<M>
where
    M: 'static,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Any + Send + Sync,
    E: Into<BoxError> + 'static,
{
    Arc::new(HandlerFn::<F, R, E>::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CommandMessage, Message};

    #[derive(Debug, thiserror::Error)]
    #[error("insufficient balance")]
    struct InsufficientBalance;

    #[tokio::test]
    async fn test_result_is_erased() {
        let handler = into_handler(|command: CommandMessage| async move {
            let amount = command.payload_as::<u32>().copied().unwrap_or_default();
            Ok::<_, HandlerError>(amount * 2)
        });

        let payload = handler
            .call(CommandMessage::named("Double", 21u32))
            .await
            .unwrap();
        assert_eq!(payload.get::<u32>(), Some(42));
    }

    #[tokio::test]
    async fn test_error_keeps_concrete_type() {
        let handler = into_handler(|_: CommandMessage| async move {
            Err::<(), _>(HandlerError::new(InsufficientBalance))
        });

        let error = handler
            .call(CommandMessage::named("Redeem", ()))
            .await
            .unwrap_err();
        assert!(error.is::<InsufficientBalance>());
    }

    #[tokio::test]
    async fn test_string_errors() {
        let handler =
            into_handler(|_: CommandMessage| async move { Err::<(), _>("card not found") });

        let error = handler
            .call(CommandMessage::named("Redeem", ()))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "card not found");
    }
}
