use std::sync::Arc;

use tracing::trace;

use crate::error::DispatchResult;
use crate::message::Message;

/// Inspects a message before any handler is resolved.
///
/// Returning `Ok` passes the (possibly rewritten) message to the next
/// interceptor; returning an error, typically
/// [`DispatchError::Vetoed`](crate::DispatchError::Vetoed), aborts the
/// dispatch without invoking any handler.
pub trait DispatchInterceptor<M>: Send + Sync + 'static {
    fn intercept(&self, message: M) -> DispatchResult<M>;
}

/// Wraps a closure as a [`DispatchInterceptor`].
pub struct DispatchInterceptorFn<F>(F);

impl<M, F> DispatchInterceptor<M> for DispatchInterceptorFn<F>
where
    F: Fn(M) -> DispatchResult<M> + Send + Sync + 'static,
{
    fn intercept(&self, message: M) -> DispatchResult<M> {
        (self.0)(message)
    }
}

/// Creates a dispatch interceptor from a closure.
pub fn dispatch_interceptor<M, F>(f: F) -> Arc<dyn DispatchInterceptor<M>>
where
    M: 'static,
    F: Fn(M) -> DispatchResult<M> + Send + Sync + 'static,
{
    Arc::new(DispatchInterceptorFn(f))
}

/// Runs `message` through `interceptors` in order.
pub fn apply_dispatch_interceptors<M: Message>(
    interceptors: &[Arc<dyn DispatchInterceptor<M>>],
    mut message: M,
) -> DispatchResult<M> {
    for (position, interceptor) in interceptors.iter().enumerate() {
        trace!(position, discriminator = message.discriminator(), "dispatch interceptor");
        message = interceptor.intercept(message)?;
    }
    Ok(message)
}
