//! Handler registries.
//!
//! Each bus owns a registry mapping discriminators to handler registrations:
//!
//! | registry                    | key                        | resolves to        |
//! |-----------------------------|----------------------------|--------------------|
//! | [`CommandHandlerRegistry`]  | command name               | exactly one        |
//! | [`QueryHandlerRegistry`]    | query name + response type | zero or more       |
//! | [`EventHandlerRegistry`]    | event type                 | zero or more       |
//!
//! # Copy-on-write
//!
//! Registries are read on every dispatch and written rarely. The table sits
//! behind an `Arc` that readers clone as a snapshot. Writers take a lock,
//! call `Arc::make_mut` (which clones the table only while snapshots are
//! alive), mutate and release. A dispatch that already holds a snapshot
//! never observes a half-applied registration.

mod command;
mod event;
mod query;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

pub use command::{
    CommandHandlerRegistry, CommandRegistration, DuplicateCommandHandlerResolver,
    DuplicateResolution, LogAndKeepExisting, RejectDuplicates, ReplaceExisting, UnknownResolution,
};
pub use event::{EventHandlerRegistry, EventRegistration};
pub use query::{QueryHandlerRegistry, QueryRegistration};

// ============================================================================
// Registration identity
// ============================================================================

static NEXT_REGISTRATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique, monotonically increasing registration identifier.
///
/// Comparing two ids tells which registration happened first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationId(u64);

impl RegistrationId {
    pub fn next() -> Self {
        Self(NEXT_REGISTRATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which bus a registration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Command,
    Query,
    Event,
}

/// A serializable view of one registration, used by administration tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    pub id: RegistrationId,
    pub kind: HandlerKind,
    /// Command name, query name or event type.
    pub discriminator: String,
    /// Free-form label naming where the handler came from.
    pub origin: String,
    /// Declared result element type, for query handlers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
}

// ============================================================================
// RegistrationHandle
// ============================================================================

pub type Canceller = Box<dyn FnOnce(RegistrationId) -> bool + Send + Sync>;

/// Returned by every registration; cancelling it removes the handler again.
pub struct RegistrationHandle {
    id: RegistrationId,
    canceller: Canceller,
}

impl RegistrationHandle {
    pub fn new(id: RegistrationId, canceller: Canceller) -> Self {
        Self { id, canceller }
    }

    /// The registration this handle refers to.
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Removes the registration if it is still installed.
    ///
    /// Returns `true` if a handler was removed. Cancelling after the registry
    /// was dropped, or after the registration was replaced, is a no-op.
    pub fn cancel(self) -> bool {
        (self.canceller)(self.id)
    }
}

impl fmt::Debug for RegistrationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Copy-on-write table
// ============================================================================

/// A value read through cheap `Arc` snapshots and updated copy-on-write.
pub(crate) struct CowCell<T> {
    inner: RwLock<Arc<T>>,
}

impl<T: Clone> CowCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    /// Returns the current snapshot.
    pub(crate) fn load(&self) -> Arc<T> {
        self.inner.read().clone()
    }

    /// Locks the cell for writing. Use `Arc::make_mut` on the guard to mutate.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Arc<T>> {
        self.inner.write()
    }

    /// Applies `f` to a private copy and publishes it.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.write();
        f(Arc::make_mut(&mut guard))
    }
}

impl<T: Clone + Default> Default for CowCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
