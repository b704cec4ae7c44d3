use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{DispatchError, DispatchResult};
use crate::handler::{BoxFuture, BoxedHandler};
use crate::message::Message;

/// Wraps the invocation of a handler.
///
/// The interceptor receives the message and the remainder of the pipeline.
/// Calling [`InterceptorChain::proceed`] runs the next stage and yields its
/// result; not calling it short-circuits the pipeline and whatever the
/// interceptor returns becomes the result.
///
/// # Example
///
/// ```rust,ignore
/// struct Timing;
///
/// #[async_trait]
/// impl HandlerInterceptor<CommandMessage> for Timing {
///     async fn intercept(
///         &self,
///         message: CommandMessage,
///         chain: InterceptorChain<CommandMessage>,
///     ) -> DispatchResult {
///         let started = Instant::now();
///         let result = chain.proceed(message).await;
///         debug!(elapsed = ?started.elapsed(), "handled");
///         result
///     }
/// }
/// ```
#[async_trait]
pub trait HandlerInterceptor<M>: Send + Sync + 'static {
    async fn intercept(&self, message: M, chain: InterceptorChain<M>) -> DispatchResult;
}

/// A shareable handler interceptor.
pub type BoxedHandlerInterceptor<M> = Arc<dyn HandlerInterceptor<M>>;

/// Wraps an async closure as a [`HandlerInterceptor`].
pub struct HandlerInterceptorFn<F>(F);

#[async_trait]
impl<M, F, Fut> HandlerInterceptor<M> for HandlerInterceptorFn<F>
where
    M: Send + 'static,
    F: Fn(M, InterceptorChain<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult> + Send + 'static,
{
    async fn intercept(&self, message: M, chain: InterceptorChain<M>) -> DispatchResult {
        (self.0)(message, chain).await
    }
}

/// Creates a handler interceptor from an async closure.
pub fn handler_interceptor<M, F, Fut>(f: F) -> BoxedHandlerInterceptor<M>
where
    M: Send + 'static,
    F: Fn(M, InterceptorChain<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult> + Send + 'static,
{
    Arc::new(HandlerInterceptorFn(f))
}

// ============================================================================
// InterceptorChain
// ============================================================================

/// The remaining stages of a handler pipeline.
///
/// A chain is a value that is consumed by [`proceed`](Self::proceed), so each
/// stage can advance the pipeline at most once.
pub struct InterceptorChain<M> {
    interceptors: Arc<[BoxedHandlerInterceptor<M>]>,
    position: usize,
    terminal: BoxedHandler<M>,
}

impl<M: Message> InterceptorChain<M> {
    /// Creates a chain that runs `interceptors` in order around `terminal`.
    pub fn new(interceptors: Arc<[BoxedHandlerInterceptor<M>]>, terminal: BoxedHandler<M>) -> Self {
        Self {
            interceptors,
            position: 0,
            terminal,
        }
    }

    /// Total number of stages, interceptors plus the handler.
    pub fn depth(&self) -> usize {
        self.interceptors.len() + 1
    }

    /// Number of stages that have not run yet, this one included.
    pub fn remaining(&self) -> usize {
        self.depth() - self.position
    }

    /// Runs the next stage with `message`.
    pub fn proceed(self, message: M) -> BoxFuture<'static, DispatchResult> {
        let Self {
            interceptors,
            position,
            terminal,
        } = self;

        match interceptors.get(position).cloned() {
            Some(interceptor) => {
                trace!(position, discriminator = message.discriminator(), "handler interceptor");
                let next = Self {
                    interceptors,
                    position: position + 1,
                    terminal,
                };
                Box::pin(async move { interceptor.intercept(message, next).await })
            }
            None => {
                trace!(discriminator = message.discriminator(), "invoking handler");
                let future = terminal.call(message);
                Box::pin(async move { future.await.map_err(DispatchError::Handler) })
            }
        }
    }
}

/// Runs `message` through `interceptors` and then `terminal`.
pub fn chain<M: Message>(
    message: M,
    interceptors: Arc<[BoxedHandlerInterceptor<M>]>,
    terminal: BoxedHandler<M>,
) -> BoxFuture<'static, DispatchResult> {
    InterceptorChain::new(interceptors, terminal).proceed(message)
}
