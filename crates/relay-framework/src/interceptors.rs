//! Ordered, runtime-updatable interceptor lists shared by the buses.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use relay_core::{RegistrationHandle, RegistrationId};

struct Entries<T: ?Sized> {
    ids: Vec<RegistrationId>,
    items: Arc<[Arc<T>]>,
}

/// A list of interceptors in registration order.
///
/// Dispatches read an `Arc<[_]>` snapshot, so registering or removing an
/// interceptor never affects a dispatch already in flight.
pub struct InterceptorList<T: ?Sized> {
    entries: Arc<RwLock<Entries<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> InterceptorList<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries {
                ids: Vec::new(),
                items: Arc::from(Vec::new()),
            })),
        }
    }

    /// Appends `item`; cancelling the returned handle removes it again.
    pub fn push(&self, item: Arc<T>) -> RegistrationHandle {
        let id = RegistrationId::next();
        {
            let mut entries = self.entries.write();
            entries.ids.push(id);
            entries.items = entries.items.iter().cloned().chain(Some(item)).collect();
        }

        let entries: Weak<RwLock<Entries<T>>> = Arc::downgrade(&self.entries);
        RegistrationHandle::new(
            id,
            Box::new(move |id| {
                let Some(entries) = entries.upgrade() else {
                    return false;
                };
                let mut entries = entries.write();
                let Some(index) = entries.ids.iter().position(|existing| *existing == id) else {
                    return false;
                };
                entries.ids.remove(index);
                entries.items = entries
                    .items
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .map(|(_, item)| item.clone())
                    .collect();
                true
            }),
        )
    }

    pub fn snapshot(&self) -> Arc<[Arc<T>]> {
        self.entries.read().items.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().ids.is_empty()
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for InterceptorList<T> {
    fn default() -> Self {
        Self::new()
    }
}
