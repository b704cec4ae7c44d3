use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::handler::{HandlerInterceptor, InterceptorChain};
use crate::error::{DispatchError, DispatchResult, HandlerError};
use crate::message::Message;

type Filter = Arc<dyn Fn(&HandlerError) -> bool + Send + Sync>;
type Recovery<M> = Arc<dyn Fn(&M, HandlerError) -> DispatchResult + Send + Sync>;

/// A handler interceptor that only acts when the wrapped stages fail.
///
/// The interceptor proceeds normally; if the result is a handler failure
/// accepted by its filter, the recovery function decides the outcome. It can
/// return a result (recover), a different error (replace), or the original
/// failure (re-raise). Other failures and successes pass through untouched.
///
/// ```rust,ignore
/// let fallback = ExceptionInterceptor::on::<CardExpired>(|_command, _error| {
///     Ok(Payload::new(Balance::zero()))
/// });
/// ```
pub struct ExceptionInterceptor<M> {
    filter: Filter,
    recover: Recovery<M>,
}

impl<M: Message> ExceptionInterceptor<M> {
    /// Handles failures whose underlying error is an `E`.
    pub fn on<E, F>(recover: F) -> Self
    where
        E: StdError + 'static,
        F: Fn(&M, HandlerError) -> DispatchResult + Send + Sync + 'static,
    {
        Self {
            filter: Arc::new(|error: &HandlerError| error.is::<E>()),
            recover: Arc::new(recover),
        }
    }

    /// Handles failures accepted by `predicate`.
    pub fn matching<P, F>(predicate: P, recover: F) -> Self
    where
        P: Fn(&HandlerError) -> bool + Send + Sync + 'static,
        F: Fn(&M, HandlerError) -> DispatchResult + Send + Sync + 'static,
    {
        Self {
            filter: Arc::new(predicate),
            recover: Arc::new(recover),
        }
    }
}

#[async_trait]
impl<M: Message> HandlerInterceptor<M> for ExceptionInterceptor<M> {
    async fn intercept(&self, message: M, chain: InterceptorChain<M>) -> DispatchResult {
        match chain.proceed(message.clone()).await {
            Err(DispatchError::Handler(error)) if (self.filter)(&error) => {
                debug!(
                    discriminator = message.discriminator(),
                    %error,
                    "exception interceptor engaged"
                );
                (self.recover)(&message, error)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::into_handler;
    use crate::interceptor::chain;
    use crate::message::{CommandMessage, Payload};

    #[derive(Debug, thiserror::Error)]
    #[error("card expired")]
    struct CardExpired;

    #[derive(Debug, thiserror::Error)]
    #[error("card blocked")]
    struct CardBlocked;

    #[derive(Debug, thiserror::Error)]
    #[error("redemption failed")]
    struct RedemptionFailed;

    fn failing_with<E>(make: fn() -> E) -> crate::handler::BoxedHandler<CommandMessage>
    where
        E: StdError + Send + Sync + 'static,
    {
        into_handler(move |_: CommandMessage| async move {
            Err::<(), _>(HandlerError::new(make()))
        })
    }

    #[tokio::test]
    async fn test_recovers_matching_type() {
        let interceptor: Arc<dyn HandlerInterceptor<CommandMessage>> =
            Arc::new(ExceptionInterceptor::on::<CardExpired, _>(|_, _| Ok(Payload::new(0u32))));

        let result = chain(
            CommandMessage::named("Redeem", ()),
            vec![interceptor].into(),
            failing_with(|| CardExpired),
        )
        .await
        .unwrap();
        assert_eq!(result.get::<u32>(), Some(0));
    }

    #[tokio::test]
    async fn test_ignores_other_types() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let interceptor: Arc<dyn HandlerInterceptor<CommandMessage>> =
            Arc::new(ExceptionInterceptor::on::<CardExpired, _>(move |_, error| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(error.into())
            }));

        let error = chain(
            CommandMessage::named("Redeem", ()),
            vec![interceptor].into(),
            failing_with(|| CardBlocked),
        )
        .await
        .unwrap_err();

        assert!(error.as_handler_error().is_some_and(|e| e.is::<CardBlocked>()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_replaces_failure() {
        let interceptor: Arc<dyn HandlerInterceptor<CommandMessage>> =
            Arc::new(ExceptionInterceptor::matching(
                |error: &HandlerError| error.to_string().starts_with("card"),
                |_: &CommandMessage, _| Err(DispatchError::handler(RedemptionFailed)),
            ));

        let error = chain(
            CommandMessage::named("Redeem", ()),
            vec![interceptor].into(),
            failing_with(|| CardBlocked),
        )
        .await
        .unwrap_err();

        assert!(error.as_handler_error().is_some_and(|e| e.is::<RedemptionFailed>()));
    }
}
