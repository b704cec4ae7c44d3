//! The command bus.
//!
//! A command is delivered to exactly one handler. Dispatching runs the
//! dispatch interceptors on the caller's task, resolves the handler for the
//! command name, and then runs the handler interceptors around the handler.
//!
//! ```text
//! dispatch(cmd)
//!   ├─ dispatch interceptors   (caller task, before any await)
//!   ├─ resolve by command name (NoHandler if absent)
//!   └─ handler interceptors ─▶ handler
//!        (caller task, or a spawned task with spawned execution)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = SimpleCommandBus::builder()
//!     .resolution(DuplicateResolution::Reject)
//!     .build();
//!
//! bus.subscribe("RedeemCard", "gift-card", into_handler(redeem))?;
//! let result = bus.dispatch(CommandMessage::named("RedeemCard", redeem_card)).await?;
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future;
use relay_core::{
    BoxFuture, BoxedHandler, BoxedHandlerInterceptor, CommandHandlerRegistry, CommandMessage,
    DispatchError, DispatchInterceptor, DispatchResult, DuplicateCommandHandlerResolver,
    DuplicateResolution, HandlerDescriptor, HandlerInterceptor, Message, RegistrationHandle,
    RegistrationResult, apply_dispatch_interceptors, chain,
};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, debug_span};

use crate::interceptors::InterceptorList;

/// Where command handlers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    /// On the task awaiting the dispatch.
    #[default]
    Inline,
    /// On a freshly spawned tokio task.
    Spawned,
}

struct CommandBusInner {
    registry: CommandHandlerRegistry,
    dispatch_interceptors: InterceptorList<dyn DispatchInterceptor<CommandMessage>>,
    handler_interceptors: InterceptorList<dyn HandlerInterceptor<CommandMessage>>,
    execution: Execution,
}

/// A command bus that invokes handlers in-process.
///
/// Cloning the bus is cheap; every clone shares the same handlers and
/// interceptors.
#[derive(Clone)]
pub struct SimpleCommandBus {
    inner: Arc<CommandBusInner>,
}

impl Default for SimpleCommandBus {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SimpleCommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> CommandBusBuilder {
        CommandBusBuilder::default()
    }

    /// Subscribes `handler` to `command_name`.
    ///
    /// Duplicates are settled by the bus's resolver; see
    /// [`DuplicateCommandHandlerResolver`].
    pub fn subscribe(
        &self,
        command_name: impl Into<String>,
        origin: impl Into<String>,
        handler: BoxedHandler<CommandMessage>,
    ) -> RegistrationResult<RegistrationHandle> {
        self.inner.registry.register(command_name, origin, handler)
    }

    /// Adds an interceptor run on every dispatch, before handler resolution.
    pub fn register_dispatch_interceptor(
        &self,
        interceptor: Arc<dyn DispatchInterceptor<CommandMessage>>,
    ) -> RegistrationHandle {
        self.inner.dispatch_interceptors.push(interceptor)
    }

    /// Adds an interceptor wrapping every handler invocation.
    pub fn register_handler_interceptor(
        &self,
        interceptor: BoxedHandlerInterceptor<CommandMessage>,
    ) -> RegistrationHandle {
        self.inner.handler_interceptors.push(interceptor)
    }

    /// Dispatches a command to its handler.
    ///
    /// Dispatch interceptors and handler resolution happen before this
    /// function returns; the returned future runs the handler pipeline.
    pub fn dispatch(&self, command: CommandMessage) -> BoxFuture<'static, DispatchResult> {
        let span = debug_span!(
            "dispatch_command",
            command = %command.command_name(),
            id = %command.identifier()
        );
        let _entered = span.enter();

        let interceptors = self.inner.dispatch_interceptors.snapshot();
        let command = match apply_dispatch_interceptors(&interceptors, command) {
            Ok(command) => command,
            Err(error) => {
                debug!(%error, "Command rejected by dispatch interceptor");
                return Box::pin(future::ready(Err(error)));
            }
        };

        let Some(registration) = self.inner.registry.resolve(command.command_name()) else {
            debug!("No handler subscribed");
            return Box::pin(future::ready(Err(DispatchError::no_handler(
                command.command_name(),
            ))));
        };
        debug!(origin = registration.origin(), "Command handler resolved");

        let interceptors = self.inner.handler_interceptors.snapshot();
        let handler = registration.handler().clone();
        let invocation = async move { chain(command, interceptors, handler).await };

        match self.inner.execution {
            Execution::Inline => Box::pin(invocation.instrument(span.clone())),
            Execution::Spawned => {
                let task = tokio::spawn(invocation.instrument(span.clone()));
                Box::pin(async move {
                    task.await
                        .map_err(|error| DispatchError::Aborted(error.to_string()))?
                })
            }
        }
    }

    /// Lists the subscribed handlers.
    pub fn handlers(&self) -> Vec<HandlerDescriptor> {
        self.inner.registry.handlers()
    }

    pub fn registry(&self) -> &CommandHandlerRegistry {
        &self.inner.registry
    }

    pub fn execution(&self) -> Execution {
        self.inner.execution
    }
}

impl fmt::Debug for SimpleCommandBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleCommandBus")
            .field("handlers", &self.inner.registry.len())
            .field("dispatch_interceptors", &self.inner.dispatch_interceptors.len())
            .field("handler_interceptors", &self.inner.handler_interceptors.len())
            .field("execution", &self.inner.execution)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Configures a [`SimpleCommandBus`].
#[derive(Default)]
pub struct CommandBusBuilder {
    resolver: Option<Arc<dyn DuplicateCommandHandlerResolver>>,
    execution: Execution,
}

impl CommandBusBuilder {
    /// Uses a custom duplicate resolver.
    pub fn resolver(mut self, resolver: Arc<dyn DuplicateCommandHandlerResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Uses one of the built-in duplicate resolution policies.
    pub fn resolution(self, resolution: DuplicateResolution) -> Self {
        self.resolver(resolution.into_resolver())
    }

    pub fn execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    /// Runs handlers on spawned tasks instead of the dispatching task.
    pub fn spawn_handlers(self, spawn: bool) -> Self {
        self.execution(if spawn {
            Execution::Spawned
        } else {
            Execution::Inline
        })
    }

    pub fn build(self) -> SimpleCommandBus {
        let resolver = self
            .resolver
            .unwrap_or_else(|| DuplicateResolution::default().into_resolver());
        SimpleCommandBus {
            inner: Arc::new(CommandBusInner {
                registry: CommandHandlerRegistry::new(resolver),
                dispatch_interceptors: InterceptorList::new(),
                handler_interceptors: InterceptorList::new(),
                execution: self.execution,
            }),
        }
    }
}
