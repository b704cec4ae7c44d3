//! Command handler registry and duplicate resolution.
//!
//! At most one handler is active per command name. When a second handler is
//! registered for a name that already has one, the registry asks its
//! [`DuplicateCommandHandlerResolver`] which of the two survives. The
//! decision is made synchronously during registration and is never revisited
//! at dispatch time.
//!
//! Three policies are provided:
//!
//! | policy                  | config name     | outcome                                 |
//! |-------------------------|-----------------|-----------------------------------------|
//! | [`LogAndKeepExisting`]  | `warn-and-keep` | existing stays, a warning is logged     |
//! | [`RejectDuplicates`]    | `reject`        | registration fails                      |
//! | [`ReplaceExisting`]     | `replace`       | candidate wins, a warning is logged     |

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{CowCell, HandlerDescriptor, HandlerKind, RegistrationHandle, RegistrationId};
use crate::error::{RegistrationError, RegistrationResult};
use crate::handler::BoxedHandler;
use crate::message::CommandMessage;

// ============================================================================
// CommandRegistration
// ============================================================================

/// A handler installed for one command name.
#[derive(Clone)]
pub struct CommandRegistration {
    id: RegistrationId,
    command_name: String,
    origin: String,
    handler: BoxedHandler<CommandMessage>,
}

impl CommandRegistration {
    pub fn new(
        command_name: impl Into<String>,
        origin: impl Into<String>,
        handler: BoxedHandler<CommandMessage>,
    ) -> Self {
        Self {
            id: RegistrationId::next(),
            command_name: command_name.into(),
            origin: origin.into(),
            handler,
        }
    }

    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn handler(&self) -> &BoxedHandler<CommandMessage> {
        &self.handler
    }

    pub fn describe(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            id: self.id,
            kind: HandlerKind::Command,
            discriminator: self.command_name.clone(),
            origin: self.origin.clone(),
            response_type: None,
        }
    }
}

impl fmt::Debug for CommandRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistration")
            .field("id", &self.id)
            .field("command_name", &self.command_name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Resolver policies
// ============================================================================

/// Decides which of two handlers for the same command survives.
///
/// Returning `Ok` with either registration installs it; returning an error
/// fails the registration call and leaves the existing handler in place.
pub trait DuplicateCommandHandlerResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        command_name: &str,
        existing: &CommandRegistration,
        candidate: &CommandRegistration,
    ) -> RegistrationResult<CommandRegistration>;
}

impl<F> DuplicateCommandHandlerResolver for F
where
    F: Fn(
            &str,
            &CommandRegistration,
            &CommandRegistration,
        ) -> RegistrationResult<CommandRegistration>
        + Send
        + Sync
        + 'static,
{
    fn resolve(
        &self,
        command_name: &str,
        existing: &CommandRegistration,
        candidate: &CommandRegistration,
    ) -> RegistrationResult<CommandRegistration> {
        self(command_name, existing, candidate)
    }
}

/// Keeps the existing handler and logs a warning. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAndKeepExisting;

impl DuplicateCommandHandlerResolver for LogAndKeepExisting {
    fn resolve(
        &self,
        command_name: &str,
        existing: &CommandRegistration,
        candidate: &CommandRegistration,
    ) -> RegistrationResult<CommandRegistration> {
        warn!(
            command = command_name,
            existing = existing.origin(),
            candidate = candidate.origin(),
            "Duplicate command handler, keeping the existing one"
        );
        Ok(existing.clone())
    }
}

/// Refuses the second registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectDuplicates;

impl DuplicateCommandHandlerResolver for RejectDuplicates {
    fn resolve(
        &self,
        command_name: &str,
        existing: &CommandRegistration,
        candidate: &CommandRegistration,
    ) -> RegistrationResult<CommandRegistration> {
        Err(RegistrationError::DuplicateHandler {
            name: command_name.to_string(),
            existing_origin: existing.origin().to_string(),
            candidate_origin: candidate.origin().to_string(),
        })
    }
}

/// Installs the newer handler and logs a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceExisting;

impl DuplicateCommandHandlerResolver for ReplaceExisting {
    fn resolve(
        &self,
        command_name: &str,
        existing: &CommandRegistration,
        candidate: &CommandRegistration,
    ) -> RegistrationResult<CommandRegistration> {
        warn!(
            command = command_name,
            existing = existing.origin(),
            candidate = candidate.origin(),
            "Duplicate command handler, replacing the existing one"
        );
        Ok(candidate.clone())
    }
}

/// Configuration-level selection of a resolver policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateResolution {
    #[default]
    #[serde(alias = "log-and-keep")]
    WarnAndKeep,
    Reject,
    Replace,
}

impl DuplicateResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WarnAndKeep => "warn-and-keep",
            Self::Reject => "reject",
            Self::Replace => "replace",
        }
    }

    /// Builds the resolver implementing this policy.
    pub fn into_resolver(self) -> Arc<dyn DuplicateCommandHandlerResolver> {
        match self {
            Self::WarnAndKeep => Arc::new(LogAndKeepExisting),
            Self::Reject => Arc::new(RejectDuplicates),
            Self::Replace => Arc::new(ReplaceExisting),
        }
    }
}

impl fmt::Display for DuplicateResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown policy name.
#[derive(Debug, Clone, Error)]
#[error("unknown duplicate resolution '{0}', expected warn-and-keep, reject or replace")]
pub struct UnknownResolution(pub String);

impl FromStr for DuplicateResolution {
    type Err = UnknownResolution;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warn-and-keep" | "log-and-keep" => Ok(Self::WarnAndKeep),
            "reject" => Ok(Self::Reject),
            "replace" => Ok(Self::Replace),
            _ => Err(UnknownResolution(s.to_string())),
        }
    }
}

// ============================================================================
// CommandHandlerRegistry
// ============================================================================

type CommandTable = HashMap<String, CommandRegistration>;

/// Maps command names to their single active handler.
///
/// Cloning the registry yields another handle to the same table.
#[derive(Clone)]
pub struct CommandHandlerRegistry {
    table: Arc<CowCell<CommandTable>>,
    resolver: Arc<dyn DuplicateCommandHandlerResolver>,
}

impl Default for CommandHandlerRegistry {
    fn default() -> Self {
        Self::new(Arc::new(LogAndKeepExisting))
    }
}

impl CommandHandlerRegistry {
    /// Creates an empty registry using `resolver` for duplicates.
    pub fn new(resolver: Arc<dyn DuplicateCommandHandlerResolver>) -> Self {
        Self {
            table: Arc::new(CowCell::default()),
            resolver,
        }
    }

    /// Installs `handler` for `command_name`.
    ///
    /// When a handler already exists, the resolver decides the outcome. If
    /// the existing handler is kept, the returned handle refers to it.
    pub fn register(
        &self,
        command_name: impl Into<String>,
        origin: impl Into<String>,
        handler: BoxedHandler<CommandMessage>,
    ) -> RegistrationResult<RegistrationHandle> {
        let candidate = CommandRegistration::new(command_name, origin, handler);
        let name = candidate.command_name.clone();

        let mut table = self.table.write();
        let survivor = match table.get(&name) {
            Some(existing) => self.resolver.resolve(&name, existing, &candidate)?,
            None => candidate,
        };
        let id = survivor.id;
        if table.get(&name).map(CommandRegistration::id) != Some(id) {
            debug!(command = %name, origin = survivor.origin(), %id, "Command handler installed");
            Arc::make_mut(&mut table).insert(name.clone(), survivor);
        }
        drop(table);

        Ok(self.handle(name, id))
    }

    fn handle(&self, name: String, id: RegistrationId) -> RegistrationHandle {
        let table: Weak<CowCell<CommandTable>> = Arc::downgrade(&self.table);
        RegistrationHandle::new(
            id,
            Box::new(move |id| {
                let Some(table) = table.upgrade() else {
                    return false;
                };
                let mut guard = table.write();
                if guard.get(&name).map(CommandRegistration::id) != Some(id) {
                    return false;
                }
                Arc::make_mut(&mut guard).remove(&name);
                debug!(command = %name, %id, "Command handler removed");
                true
            }),
        )
    }

    /// Returns the active handler for `command_name`.
    pub fn resolve(&self, command_name: &str) -> Option<CommandRegistration> {
        self.table.load().get(command_name).cloned()
    }

    pub fn contains(&self, command_name: &str) -> bool {
        self.table.load().contains_key(command_name)
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    /// Lists every active registration in registration order.
    pub fn handlers(&self) -> Vec<HandlerDescriptor> {
        let mut handlers: Vec<_> = self
            .table
            .load()
            .values()
            .map(CommandRegistration::describe)
            .collect();
        handlers.sort_by_key(|descriptor| descriptor.id);
        handlers
    }
}

impl fmt::Debug for CommandHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandlerRegistry")
            .field("handlers", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::into_handler;

    fn returning(value: &'static str) -> BoxedHandler<CommandMessage> {
        into_handler(move |_: CommandMessage| async move { Ok::<_, HandlerError>(value) })
    }

    async fn invoke(registry: &CommandHandlerRegistry, name: &str) -> Option<&'static str> {
        let registration = registry.resolve(name)?;
        let payload = registration
            .handler()
            .call(CommandMessage::named(name, ()))
            .await
            .ok()?;
        payload.get::<&'static str>()
    }

    #[tokio::test]
    async fn test_keep_existing_by_default() {
        let registry = CommandHandlerRegistry::default();
        let first = registry.register("RedeemCard", "a", returning("a")).unwrap();
        let second = registry.register("RedeemCard", "b", returning("b")).unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(invoke(&registry, "RedeemCard").await, Some("a"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_existing() {
        let registry = CommandHandlerRegistry::new(DuplicateResolution::Replace.into_resolver());
        let first = registry.register("RedeemCard", "a", returning("a")).unwrap();
        registry.register("RedeemCard", "b", returning("b")).unwrap();

        assert_eq!(invoke(&registry, "RedeemCard").await, Some("b"));
        assert!(!first.cancel(), "replaced registration must not remove the new one");
        assert!(registry.contains("RedeemCard"));
    }

    #[test]
    fn test_reject_duplicates() {
        let registry = CommandHandlerRegistry::new(Arc::new(RejectDuplicates));
        registry.register("RedeemCard", "a", returning("a")).unwrap();
        let error = registry.register("RedeemCard", "b", returning("b")).unwrap_err();

        let RegistrationError::DuplicateHandler {
            name,
            existing_origin,
            candidate_origin,
        } = error;
        assert_eq!(name, "RedeemCard");
        assert_eq!(existing_origin, "a");
        assert_eq!(candidate_origin, "b");
    }

    #[test]
    fn test_cancel_removes() {
        let registry = CommandHandlerRegistry::default();
        let handle = registry.register("IssueCard", "a", returning("a")).unwrap();
        assert!(handle.cancel());
        assert!(registry.resolve("IssueCard").is_none());
    }

    #[test]
    fn test_custom_resolver_closure() {
        let registry = CommandHandlerRegistry::new(Arc::new(
            |_: &str,
             existing: &CommandRegistration,
             candidate: &CommandRegistration|
             -> RegistrationResult<CommandRegistration> {
                Ok(if candidate.origin() == "preferred" {
                    candidate.clone()
                } else {
                    existing.clone()
                })
            },
        ));
        registry.register("IssueCard", "a", returning("a")).unwrap();
        registry.register("IssueCard", "other", returning("o")).unwrap();
        registry.register("IssueCard", "preferred", returning("p")).unwrap();

        assert_eq!(
            registry.resolve("IssueCard").map(|r| r.origin().to_string()),
            Some("preferred".into())
        );
    }

    #[test]
    fn test_resolution_names() {
        assert_eq!("reject".parse::<DuplicateResolution>().unwrap(), DuplicateResolution::Reject);
        assert_eq!(
            "log-and-keep".parse::<DuplicateResolution>().unwrap(),
            DuplicateResolution::WarnAndKeep
        );
        assert!("ignore".parse::<DuplicateResolution>().is_err());
        assert_eq!(DuplicateResolution::default().to_string(), "warn-and-keep");
    }
}
