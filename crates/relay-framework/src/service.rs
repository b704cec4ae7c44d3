//! `tower::Service` implementations for the buses.
//!
//! Each bus can be used wherever a tower service is expected, so tower
//! middleware (timeouts, rate limits, buffering) can be layered on top:
//!
//! ```rust,ignore
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower::timeout::TimeoutLayer;
//!
//! let service = ServiceBuilder::new()
//!     .layer(TimeoutLayer::new(Duration::from_secs(5)))
//!     .service(command_bus.clone());
//!
//! let payload = service.oneshot(CommandMessage::named("RedeemCard", card)).await?;
//! ```

use std::task::{Context, Poll};

use relay_core::{
    BoxFuture, CommandMessage, DispatchError, DispatchResult, EventMessage, Payload, QueryMessage,
    QueryResponse,
};
use tower::Service;

use crate::command::SimpleCommandBus;
use crate::event::{EventBus, InMemoryEventStore};
use crate::query::SimpleQueryBus;

impl Service<CommandMessage> for SimpleCommandBus {
    type Response = Payload;
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, command: CommandMessage) -> Self::Future {
        self.dispatch(command)
    }
}

impl Service<QueryMessage> for SimpleQueryBus {
    type Response = QueryResponse;
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult<QueryResponse>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, query: QueryMessage) -> Self::Future {
        self.query(query)
    }
}

impl Service<Vec<EventMessage>> for InMemoryEventStore {
    type Response = Vec<u64>;
    type Error = DispatchError;
    type Future = futures::future::Ready<DispatchResult<Vec<u64>>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, events: Vec<EventMessage>) -> Self::Future {
        futures::future::ready(self.publish(events))
    }
}
