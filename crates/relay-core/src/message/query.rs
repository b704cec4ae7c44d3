use std::any::{Any, TypeId};
use std::fmt;

use super::{GenericMessage, Message, Payload};

/// How many results a query expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Exactly one `T`.
    Instance,
    /// A `Vec<T>`.
    Multiple,
    /// An `Option<T>`.
    Optional,
}

/// Describes the shape of a query result and decides whether a handler's
/// declared result can satisfy it.
///
/// A response type is built for an element type `T`, so it knows the type
/// ids of `T`, `Vec<T>` and `Option<T>` up front. Matching is then a pure
/// comparison of those ids against a handler's declared type:
///
/// | requested  | handler declares `T` | `Vec<T>` | `Option<T>` |
/// |------------|----------------------|----------|-------------|
/// | instance   | yes                  | no       | yes         |
/// | multiple   | yes                  | yes      | no          |
/// | optional   | yes                  | no       | yes         |
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseType {
    cardinality: Cardinality,
    element: TypeId,
    element_name: &'static str,
    list: TypeId,
    optional: TypeId,
}

impl ResponseType {
    fn of<T: Any>(cardinality: Cardinality) -> Self {
        Self {
            cardinality,
            element: TypeId::of::<T>(),
            element_name: std::any::type_name::<T>(),
            list: TypeId::of::<Vec<T>>(),
            optional: TypeId::of::<Option<T>>(),
        }
    }

    /// Expects a single `T`.
    pub fn instance_of<T: Any>() -> Self {
        Self::of::<T>(Cardinality::Instance)
    }

    /// Expects a `Vec<T>`.
    pub fn multiple_instances_of<T: Any>() -> Self {
        Self::of::<T>(Cardinality::Multiple)
    }

    /// Expects an `Option<T>`.
    pub fn optional_instance_of<T: Any>() -> Self {
        Self::of::<T>(Cardinality::Optional)
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn element_type(&self) -> TypeId {
        self.element
    }

    pub fn element_name(&self) -> &'static str {
        self.element_name
    }

    /// Returns `true` if a handler whose declared result is `declared` can
    /// answer a query expecting this response type.
    pub fn matches(&self, declared: &ResponseType) -> bool {
        let declared = declared.declared_type();
        match self.cardinality {
            Cardinality::Instance | Cardinality::Optional => {
                declared == self.element || declared == self.optional
            }
            Cardinality::Multiple => declared == self.element || declared == self.list,
        }
    }

    /// The concrete type a handler registered with this response type produces.
    pub fn declared_type(&self) -> TypeId {
        match self.cardinality {
            Cardinality::Instance => self.element,
            Cardinality::Multiple => self.list,
            Cardinality::Optional => self.optional,
        }
    }
}

impl fmt::Debug for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseType")
            .field("cardinality", &self.cardinality)
            .field("element", &self.element_name)
            .finish()
    }
}

/// A query, routed by name and expected response type.
#[derive(Debug, Clone)]
pub struct QueryMessage {
    message: GenericMessage,
    query_name: String,
    response_type: ResponseType,
}

impl QueryMessage {
    /// Creates a query named after the payload's type.
    pub fn new<T: Any + Send + Sync>(payload: T, response_type: ResponseType) -> Self {
        Self::named(std::any::type_name::<T>(), payload, response_type)
    }

    pub fn named<T: Any + Send + Sync>(
        name: impl Into<String>,
        payload: T,
        response_type: ResponseType,
    ) -> Self {
        Self::from_generic(name, GenericMessage::new(payload), response_type)
    }

    pub fn from_generic(
        name: impl Into<String>,
        message: GenericMessage,
        response_type: ResponseType,
    ) -> Self {
        Self {
            message,
            query_name: name.into(),
            response_type,
        }
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn response_type(&self) -> &ResponseType {
        &self.response_type
    }
}

impl Message for QueryMessage {
    fn generic(&self) -> &GenericMessage {
        &self.message
    }

    fn map_generic<F>(self, f: F) -> Self
    where
        F: FnOnce(GenericMessage) -> GenericMessage,
    {
        Self {
            message: f(self.message),
            query_name: self.query_name,
            response_type: self.response_type,
        }
    }

    fn discriminator(&self) -> &str {
        &self.query_name
    }
}

/// A handler's answer to a query, readable in any shape its response type allows.
#[derive(Debug, Clone)]
pub struct QueryResponse(Payload);

impl QueryResponse {
    pub fn new(payload: Payload) -> Self {
        Self(payload)
    }

    pub fn payload(&self) -> &Payload {
        &self.0
    }

    pub fn into_payload(self) -> Payload {
        self.0
    }

    /// Reads the response as a single `T`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.0
            .get::<T>()
            .or_else(|| self.0.downcast_ref::<Option<T>>().cloned().flatten())
    }

    /// Reads the response as a list of `T`; a single value becomes a one-element list.
    pub fn list<T: Any + Clone>(&self) -> Option<Vec<T>> {
        self.0
            .get::<Vec<T>>()
            .or_else(|| self.0.get::<T>().map(|value| vec![value]))
    }

    /// Reads the response as an optional `T`.
    ///
    /// The outer `None` means the payload is neither `T` nor `Option<T>`.
    pub fn optional<T: Any + Clone>(&self) -> Option<Option<T>> {
        self.0
            .get::<Option<T>>()
            .or_else(|| self.0.get::<T>().map(Some))
    }
}

impl From<Payload> for QueryResponse {
    fn from(payload: Payload) -> Self {
        Self(payload)
    }
}
