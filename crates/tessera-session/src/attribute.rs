//! Session attribute values.
//!
//! An attribute is either plain data ([`serde_json::Value`]), which survives
//! passivation and bulk unload, or a live object implementing
//! [`SessionObject`], which never leaves the process. Live objects receive
//! binding and activation callbacks; when a session is written out they are
//! unbound and dropped.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::session::Session;

/// Passed to [`SessionObject`] binding callbacks.
#[derive(Debug, Clone, Copy)]
pub struct BindingEvent<'a> {
    /// Session the object is bound to or unbound from.
    pub session: &'a Session,
    /// Attribute name the object is stored under.
    pub name: &'a str,
}

/// A live, non-serializable attribute value.
///
/// All hooks default to no-ops.
pub trait SessionObject: Any + Send + Sync + fmt::Debug {
    /// Called after the object was stored in a session.
    fn value_bound(&self, _event: &BindingEvent<'_>) {}

    /// Called after the object was removed from a session, replaced,
    /// dropped during serialization, or unbound by expiration.
    fn value_unbound(&self, _event: &BindingEvent<'_>) {}

    /// Called before the owning session is written to a store.
    fn will_passivate(&self, _session: &Session) {}

    /// Called after the owning session was restored into memory.
    fn did_activate(&self, _session: &Session) {}
}

/// Value stored under a session attribute name.
#[derive(Clone)]
pub enum AttributeValue {
    /// Serializable data.
    Value(Value),
    /// Live object; dropped when the session is serialized.
    Object(Arc<dyn SessionObject>),
}

impl AttributeValue {
    /// Wrap a live object.
    pub fn live(object: impl SessionObject) -> Self {
        AttributeValue::Object(Arc::new(object))
    }

    /// Whether the value can be written to a store or persistence file.
    pub fn is_serializable(&self) -> bool {
        matches!(self, AttributeValue::Value(_))
    }

    /// The serializable data, if this is not a live object.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            AttributeValue::Value(v) => Some(v),
            AttributeValue::Object(_) => None,
        }
    }

    /// The live object, if any.
    pub fn as_object(&self) -> Option<&Arc<dyn SessionObject>> {
        match self {
            AttributeValue::Value(_) => None,
            AttributeValue::Object(o) => Some(o),
        }
    }

    /// Downcast a live object to its concrete type.
    pub fn downcast_ref<T: SessionObject>(&self) -> Option<&T> {
        let object: &dyn Any = self.as_object()?.as_ref();
        object.downcast_ref::<T>()
    }

    /// Render the value for administrative listings.
    pub fn display(&self) -> String {
        match self {
            AttributeValue::Value(Value::String(s)) => s.clone(),
            AttributeValue::Value(v) => v.to_string(),
            AttributeValue::Object(o) => format!("{:?}", o),
        }
    }

    /// Identity for live objects, equality for data.
    pub(crate) fn same_as(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::Object(a), AttributeValue::Object(b)) => Arc::ptr_eq(a, b),
            (AttributeValue::Value(a), AttributeValue::Value(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            AttributeValue::Object(o) => f.debug_tuple("Object").field(o).finish(),
        }
    }
}

impl From<Value> for AttributeValue {
    fn from(value: Value) -> Self {
        AttributeValue::Value(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Value(Value::String(value.to_string()))
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Value(Value::String(value))
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Value(Value::from(value))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Value(Value::Bool(value))
    }
}
