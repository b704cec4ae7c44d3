use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{CowCell, HandlerDescriptor, HandlerKind, RegistrationHandle, RegistrationId};
use crate::handler::BoxedHandler;
use crate::message::{QueryMessage, ResponseType};

/// A query handler together with the result type it declares.
#[derive(Clone)]
pub struct QueryRegistration {
    id: RegistrationId,
    query_name: String,
    origin: String,
    response_type: ResponseType,
    handler: BoxedHandler<QueryMessage>,
}

impl QueryRegistration {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn response_type(&self) -> &ResponseType {
        &self.response_type
    }

    pub fn handler(&self) -> &BoxedHandler<QueryMessage> {
        &self.handler
    }

    pub fn describe(&self) -> HandlerDescriptor {
        HandlerDescriptor {
            id: self.id,
            kind: HandlerKind::Query,
            discriminator: self.query_name.clone(),
            origin: self.origin.clone(),
            response_type: Some(format!("{:?}", self.response_type)),
        }
    }
}

impl fmt::Debug for QueryRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRegistration")
            .field("id", &self.id)
            .field("query_name", &self.query_name)
            .field("origin", &self.origin)
            .field("response_type", &self.response_type)
            .finish_non_exhaustive()
    }
}

type QueryTable = HashMap<String, Vec<QueryRegistration>>;

/// Maps query names to any number of handlers.
///
/// Handlers for the same name are kept in registration order, which is also
/// the order [`resolve`](Self::resolve) returns them in.
#[derive(Clone, Default)]
pub struct QueryHandlerRegistry {
    table: Arc<CowCell<QueryTable>>,
}

impl QueryHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler answering `query_name` with results of `response_type`.
    pub fn register(
        &self,
        query_name: impl Into<String>,
        origin: impl Into<String>,
        response_type: ResponseType,
        handler: BoxedHandler<QueryMessage>,
    ) -> RegistrationHandle {
        let registration = QueryRegistration {
            id: RegistrationId::next(),
            query_name: query_name.into(),
            origin: origin.into(),
            response_type,
            handler,
        };
        let id = registration.id;
        let name = registration.query_name.clone();
        debug!(query = %name, origin = registration.origin(), %id, "Query handler installed");

        self.table
            .update(|table| table.entry(name.clone()).or_default().push(registration));

        let table = Arc::downgrade(&self.table);
        RegistrationHandle::new(
            id,
            Box::new(move |id| {
                let Some(table) = table.upgrade() else {
                    return false;
                };
                let mut guard = table.write();
                let installed = guard
                    .get(&name)
                    .is_some_and(|handlers| handlers.iter().any(|r| r.id == id));
                if !installed {
                    return false;
                }
                let table = Arc::make_mut(&mut guard);
                if let Some(handlers) = table.get_mut(&name) {
                    handlers.retain(|r| r.id != id);
                    if handlers.is_empty() {
                        table.remove(&name);
                    }
                }
                true
            }),
        )
    }

    /// Returns the handlers for `query_name` whose declared result satisfies
    /// `response_type`, earliest registration first.
    pub fn resolve(
        &self,
        query_name: &str,
        response_type: &ResponseType,
    ) -> Vec<QueryRegistration> {
        self.table
            .load()
            .get(query_name)
            .map(|handlers| {
                handlers
                    .iter()
                    .filter(|r| response_type.matches(&r.response_type))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.table.load().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }

    pub fn handlers(&self) -> Vec<HandlerDescriptor> {
        let mut handlers: Vec<_> = self
            .table
            .load()
            .values()
            .flatten()
            .map(QueryRegistration::describe)
            .collect();
        handlers.sort_by_key(|descriptor| descriptor.id);
        handlers
    }
}

impl fmt::Debug for QueryHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryHandlerRegistry")
            .field("handlers", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::into_handler;

    fn handler() -> BoxedHandler<QueryMessage> {
        into_handler(|_: QueryMessage| async { Ok::<_, HandlerError>(1u32) })
    }

    #[test]
    fn test_multiple_handlers_coexist_in_order() {
        let registry = QueryHandlerRegistry::new();
        let a = registry.register("Balance", "a", ResponseType::instance_of::<u32>(), handler());
        let b = registry.register("Balance", "b", ResponseType::instance_of::<u32>(), handler());
        registry.register("Balance", "c", ResponseType::instance_of::<String>(), handler());

        let resolved = registry.resolve("Balance", &ResponseType::instance_of::<u32>());
        let ids: Vec<_> = resolved.iter().map(QueryRegistration::id).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_cancel_one_of_many() {
        let registry = QueryHandlerRegistry::new();
        let a = registry.register("Balance", "a", ResponseType::instance_of::<u32>(), handler());
        let _b = registry.register("Balance", "b", ResponseType::instance_of::<u32>(), handler());

        assert!(a.cancel());
        let origins: Vec<_> = registry
            .resolve("Balance", &ResponseType::instance_of::<u32>())
            .iter()
            .map(|r| r.origin().to_string())
            .collect();
        assert_eq!(origins, vec!["b"]);
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = QueryHandlerRegistry::new();
        assert!(registry.resolve("Nothing", &ResponseType::instance_of::<u32>()).is_empty());
    }
}
