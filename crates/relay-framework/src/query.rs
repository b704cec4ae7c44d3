//! The query bus.
//!
//! Queries are routed by name and expected [`ResponseType`]. Two delivery
//! modes are supported:
//!
//! - **Point-to-point** ([`SimpleQueryBus::query`]) - the earliest-registered
//!   matching handler answers.
//! - **Scatter-gather** ([`SimpleQueryBus::scatter_gather`]) - every matching
//!   handler answers concurrently, each within its own time budget. One
//!   entry is returned per handler, in registration order, and a failing
//!   handler only fails its own entry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, join_all};
use relay_core::{
    BoxFuture, BoxedHandler, BoxedHandlerInterceptor, DispatchError, DispatchInterceptor,
    DispatchResult, HandlerDescriptor, HandlerInterceptor, Message, QueryHandlerRegistry,
    QueryMessage, QueryResponse, RegistrationHandle, RegistrationId, ResponseType,
    apply_dispatch_interceptors, chain,
};
use tracing::{Instrument, debug, debug_span, warn};

use crate::interceptors::InterceptorList;

/// Default time budget of one scatter-gather handler.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// One handler's answer in a scatter-gather query.
#[derive(Debug, Clone)]
pub struct ScatterGatherEntry {
    pub registration: RegistrationId,
    pub origin: String,
    pub outcome: DispatchResult<QueryResponse>,
}

impl ScatterGatherEntry {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn response(&self) -> Option<&QueryResponse> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&DispatchError> {
        self.outcome.as_ref().err()
    }
}

struct QueryBusInner {
    registry: QueryHandlerRegistry,
    dispatch_interceptors: InterceptorList<dyn DispatchInterceptor<QueryMessage>>,
    handler_interceptors: InterceptorList<dyn HandlerInterceptor<QueryMessage>>,
    handler_timeout: Duration,
}

/// A query bus that invokes handlers in-process.
#[derive(Clone)]
pub struct SimpleQueryBus {
    inner: Arc<QueryBusInner>,
}

impl Default for SimpleQueryBus {
    fn default() -> Self {
        Self::with_handler_timeout(DEFAULT_HANDLER_TIMEOUT)
    }
}

impl SimpleQueryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus whose scatter-gather handlers get `timeout` each.
    pub fn with_handler_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(QueryBusInner {
                registry: QueryHandlerRegistry::new(),
                dispatch_interceptors: InterceptorList::new(),
                handler_interceptors: InterceptorList::new(),
                handler_timeout: timeout,
            }),
        }
    }

    /// Subscribes `handler` to `query_name`, declaring the result shape it
    /// produces.
    pub fn subscribe(
        &self,
        query_name: impl Into<String>,
        origin: impl Into<String>,
        response_type: ResponseType,
        handler: BoxedHandler<QueryMessage>,
    ) -> RegistrationHandle {
        self.inner
            .registry
            .register(query_name, origin, response_type, handler)
    }

    pub fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn DispatchInterceptor<QueryMessage>>,
    ) -> RegistrationHandle {
        self.inner.dispatch_interceptors.push(interceptor)
    }

    pub fn register_handler_interceptor(
        &self,
        interceptor: BoxedHandlerInterceptor<QueryMessage>,
    ) -> RegistrationHandle {
        self.inner.handler_interceptors.push(interceptor)
    }

    pub fn handler_timeout(&self) -> Duration {
        self.inner.handler_timeout
    }

    /// Sends the query to the earliest-registered matching handler.
    pub fn query(&self, query: QueryMessage) -> BoxFuture<'static, DispatchResult<QueryResponse>> {
        let span = debug_span!("query", query = %query.query_name(), id = %query.identifier());
        let _entered = span.enter();

        let query = match self.intercept(query) {
            Ok(query) => query,
            Err(error) => return Box::pin(future::ready(Err(error))),
        };

        let handlers = self
            .inner
            .registry
            .resolve(query.query_name(), query.response_type());
        let Some(registration) = handlers.into_iter().next() else {
            debug!("No matching query handler");
            return Box::pin(future::ready(Err(DispatchError::no_handler(query.query_name()))));
        };
        debug!(origin = registration.origin(), "Query handler resolved");

        let interceptors = self.inner.handler_interceptors.snapshot();
        let handler = registration.handler().clone();
        Box::pin(
            async move { chain(query, interceptors, handler).await.map(QueryResponse::new) }
                .instrument(span.clone()),
        )
    }

    /// Sends the query to every matching handler, each bounded by the bus's
    /// handler timeout.
    pub fn scatter_gather(
        &self,
        query: QueryMessage,
    ) -> BoxFuture<'static, DispatchResult<Vec<ScatterGatherEntry>>> {
        self.scatter_gather_with_timeout(query, self.inner.handler_timeout)
    }

    /// Like [`scatter_gather`](Self::scatter_gather) with a per-call handler timeout.
    pub fn scatter_gather_with_timeout(
        &self,
        query: QueryMessage,
        timeout: Duration,
    ) -> BoxFuture<'static, DispatchResult<Vec<ScatterGatherEntry>>> {
        let span = debug_span!(
            "scatter_gather",
            query = %query.query_name(),
            id = %query.identifier(),
            ?timeout
        );
        let _entered = span.enter();

        let query = match self.intercept(query) {
            Ok(query) => query,
            Err(error) => return Box::pin(future::ready(Err(error))),
        };

        let handlers = self
            .inner
            .registry
            .resolve(query.query_name(), query.response_type());
        debug!(handlers = handlers.len(), "Scatter-gather handlers resolved");

        let interceptors = self.inner.handler_interceptors.snapshot();
        let invocations = handlers.into_iter().map(|registration| {
            let query = query.clone();
            let interceptors = interceptors.clone();
            let handler = registration.handler().clone();
            let origin = registration.origin().to_string();
            let id = registration.id();
            async move {
                let outcome =
                    match tokio::time::timeout(timeout, chain(query, interceptors, handler)).await {
                        Ok(result) => result.map(QueryResponse::new),
                        Err(_) => {
                            warn!(%origin, ?timeout, "Query handler timed out");
                            Err(DispatchError::Timeout {
                                handler: origin.clone(),
                                timeout,
                            })
                        }
                    };
                ScatterGatherEntry {
                    registration: id,
                    origin,
                    outcome,
                }
            }
        });
        let gathered = join_all(invocations);

        Box::pin(async move { Ok(gathered.await) }.instrument(span.clone()))
    }

    pub fn handlers(&self) -> Vec<HandlerDescriptor> {
        self.inner.registry.handlers()
    }

    pub fn registry(&self) -> &QueryHandlerRegistry {
        &self.inner.registry
    }

    fn intercept(&self, query: QueryMessage) -> DispatchResult<QueryMessage> {
        let interceptors = self.inner.dispatch_interceptors.snapshot();
        apply_dispatch_interceptors(&interceptors, query)
            .inspect_err(|error| debug!(%error, "Query rejected by dispatch interceptor"))
    }
}

impl fmt::Debug for SimpleQueryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleQueryBus")
            .field("handlers", &self.inner.registry.len())
            .field("handler_timeout", &self.inner.handler_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{HandlerError, into_handler};

    use super::*;

    fn answering(value: u32) -> BoxedHandler<QueryMessage> {
        into_handler(move |_: QueryMessage| async move { Ok::<_, HandlerError>(value) })
    }

    fn balance_query() -> QueryMessage {
        QueryMessage::named("Balance", "gc-1", ResponseType::instance_of::<u32>())
    }

    #[tokio::test]
    async fn test_point_to_point_prefers_earliest() {
        let bus = SimpleQueryBus::new();
        bus.subscribe("Balance", "first", ResponseType::instance_of::<u32>(), answering(1));
        bus.subscribe("Balance", "second", ResponseType::instance_of::<u32>(), answering(2));

        let response = bus.query(balance_query()).await.unwrap();
        assert_eq!(response.get::<u32>(), Some(1));
    }

    #[tokio::test]
    async fn test_point_to_point_filters_by_response_type() {
        let bus = SimpleQueryBus::new();
        bus.subscribe("Balance", "text", ResponseType::instance_of::<String>(), answering(1));
        bus.subscribe("Balance", "numeric", ResponseType::instance_of::<u32>(), answering(2));

        let response = bus.query(balance_query()).await.unwrap();
        assert_eq!(response.get::<u32>(), Some(2));
    }

    #[tokio::test]
    async fn test_no_handler() {
        let bus = SimpleQueryBus::new();
        assert!(matches!(
            bus.query(balance_query()).await,
            Err(DispatchError::NoHandler { .. })
        ));
        assert!(bus.scatter_gather(balance_query()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out() {
        let bus = SimpleQueryBus::with_handler_timeout(Duration::from_millis(50));
        bus.subscribe("Balance", "fast", ResponseType::instance_of::<u32>(), answering(1));
        bus.subscribe(
            "Balance",
            "slow",
            ResponseType::instance_of::<u32>(),
            into_handler(|_: QueryMessage| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, HandlerError>(2u32)
            }),
        );

        let entries = bus.scatter_gather(balance_query()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_success());
        assert!(matches!(
            entries[1].error(),
            Some(DispatchError::Timeout { handler, .. }) if handler == "slow"
        ));
    }
}
