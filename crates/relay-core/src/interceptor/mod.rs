//! Interceptors around message dispatch and handling.
//!
//! Two stages can be intercepted:
//!
//! - **Dispatch** ([`DispatchInterceptor`]) - runs once per dispatch on the
//!   caller's task, before a handler is resolved. It may rewrite the message
//!   or veto it.
//! - **Handler** ([`HandlerInterceptor`]) - wraps the handler invocation on
//!   the task that runs the handler. It receives the rest of the pipeline as
//!   an [`InterceptorChain`] and decides whether and how to proceed.
//!
//! ```text
//! dispatch ─▶ [D0] ─▶ [D1] ─▶ resolve ─▶ [H0 ─▶ [H1 ─▶ handler]]
//! ```
//!
//! Both kinds run in the order they were registered.

mod dispatch;
mod exception;
mod handler;

pub use dispatch::{
    DispatchInterceptor, DispatchInterceptorFn, apply_dispatch_interceptors, dispatch_interceptor,
};
pub use exception::ExceptionInterceptor;
pub use handler::{
    BoxedHandlerInterceptor, HandlerInterceptor, HandlerInterceptorFn, InterceptorChain, chain,
    handler_interceptor,
};
