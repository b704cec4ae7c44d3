use std::any::Any;

use super::{GenericMessage, Message, Payload};

/// A message requesting exactly one action, routed by command name.
#[derive(Debug, Clone)]
pub struct CommandMessage {
    message: GenericMessage,
    command_name: String,
}

impl CommandMessage {
    /// Creates a command named after the payload's type.
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self::named(std::any::type_name::<T>(), payload)
    }

    /// Creates a command with an explicit name.
    pub fn named<T: Any + Send + Sync>(name: impl Into<String>, payload: T) -> Self {
        Self::from_generic(name, GenericMessage::new(payload))
    }

    /// Creates a command with an explicit name around an erased payload.
    pub fn from_payload(name: impl Into<String>, payload: Payload) -> Self {
        Self::from_generic(name, GenericMessage::from_payload(payload))
    }

    pub fn from_generic(name: impl Into<String>, message: GenericMessage) -> Self {
        Self {
            message,
            command_name: name.into(),
        }
    }

    pub fn command_name(&self) -> &str {
        &self.command_name
    }
}

impl Message for CommandMessage {
    fn generic(&self) -> &GenericMessage {
        &self.message
    }

    fn map_generic<F>(self, f: F) -> Self
    where
        F: FnOnce(GenericMessage) -> GenericMessage,
    {
        Self {
            message: f(self.message),
            command_name: self.command_name,
        }
    }

    fn discriminator(&self) -> &str {
        &self.command_name
    }
}
