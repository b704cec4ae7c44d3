//! Type-erased message payloads.
//!
//! Payloads are stored behind an `Arc<dyn Any>` so a message can be cloned
//! into every interceptor and handler without copying the value. Typed access
//! goes through runtime downcasting, in the same way boxed events are
//! inspected by handlers.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// An opaque, shareable payload value.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    /// Wraps a value as a payload.
    ///
    /// Wrapping a `Payload` returns it unchanged instead of nesting it.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        let boxed: Box<dyn Any + Send + Sync> = Box::new(value);
        match boxed.downcast::<Payload>() {
            Ok(payload) => *payload,
            Err(value) => Self {
                value: Arc::from(value),
                type_name: std::any::type_name::<T>(),
            },
        }
    }

    /// A payload carrying `()`, used by handlers that produce no result.
    pub fn empty() -> Self {
        Self::new(())
    }

    /// Returns the fully qualified type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the [`TypeId`] of the wrapped value.
    pub fn type_id(&self) -> TypeId {
        Any::type_id(&*self.value)
    }

    /// Returns `true` if the wrapped value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Returns `true` if the payload is `()`.
    pub fn is_empty(&self) -> bool {
        self.is::<()>()
    }

    /// Borrows the wrapped value as a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Clones the wrapped value out as a `T`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}
