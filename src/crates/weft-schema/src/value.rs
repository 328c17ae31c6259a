//! The dynamic value tree exchanged between the serializer and user code.
//!
//! Wire values are plain `serde_json::Value`s. Expansion turns them into
//! [`TypedValue`]s: primitives stay primitives, structures and models
//! become shared opaque objects that user code downcasts to its concrete
//! types. This is the typed counterpart of the registry's identifier
//! mapping — a `TypedValue::Structure` always carries the identifier it
//! was expanded under.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::identifier::Identifier;

/// A shared, type-erased rich object (an expanded structure or model).
pub type AnyObject = Arc<dyn Any + Send + Sync>;

/// An expanded in-memory value, shaped by the port tree that produced it.
#[derive(Clone)]
pub enum TypedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(DateTime<Utc>),
    List(Vec<TypedValue>),
    Dict(BTreeMap<String, TypedValue>),
    /// A member of a registered enum, held by name.
    EnumMember {
        identifier: Identifier,
        member: String,
    },
    /// An expanded GLOBAL or LOCAL structure.
    Structure {
        identifier: Identifier,
        object: AnyObject,
    },
    /// An instantiated model.
    Model {
        identifier: Identifier,
        object: AnyObject,
    },
}

impl TypedValue {
    /// Wrap a concrete object as a structure value.
    pub fn structure<T: Send + Sync + 'static>(identifier: Identifier, object: T) -> Self {
        TypedValue::Structure {
            identifier,
            object: Arc::new(object),
        }
    }

    /// Wrap a concrete object as a model value.
    pub fn model<T: Send + Sync + 'static>(identifier: Identifier, object: T) -> Self {
        TypedValue::Model {
            identifier,
            object: Arc::new(object),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypedValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            TypedValue::Float(f) => Some(*f),
            TypedValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            TypedValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[TypedValue]> {
        match self {
            TypedValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, TypedValue>> {
        match self {
            TypedValue::Dict(entries) => Some(entries),
            _ => None,
        }
    }

    /// Downcast the held structure or model object to a concrete type.
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        match self {
            TypedValue::Structure { object, .. } | TypedValue::Model { object, .. } => {
                object.clone().downcast::<T>().ok()
            }
            _ => None,
        }
    }

    /// The identifier of a structure, model or enum value.
    pub fn identifier(&self) -> Option<&Identifier> {
        match self {
            TypedValue::Structure { identifier, .. }
            | TypedValue::Model { identifier, .. }
            | TypedValue::EnumMember { identifier, .. } => Some(identifier),
            _ => None,
        }
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Null => write!(f, "Null"),
            TypedValue::Bool(b) => write!(f, "Bool({})", b),
            TypedValue::Int(i) => write!(f, "Int({})", i),
            TypedValue::Float(v) => write!(f, "Float({})", v),
            TypedValue::Str(s) => write!(f, "Str({:?})", s),
            TypedValue::Date(d) => write!(f, "Date({})", d.to_rfc3339()),
            TypedValue::List(items) => f.debug_list().entries(items).finish(),
            TypedValue::Dict(entries) => f.debug_map().entries(entries).finish(),
            TypedValue::EnumMember { identifier, member } => {
                write!(f, "EnumMember({}::{})", identifier, member)
            }
            TypedValue::Structure { identifier, .. } => write!(f, "Structure({})", identifier),
            TypedValue::Model { identifier, .. } => write!(f, "Model({})", identifier),
        }
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        use TypedValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Date(a), Date(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Dict(a), Dict(b)) => a == b,
            (
                EnumMember {
                    identifier: ia,
                    member: ma,
                },
                EnumMember {
                    identifier: ib,
                    member: mb,
                },
            ) => ia == ib && ma == mb,
            // Opaque objects compare by identity: equal only if they are
            // the same shared allocation.
            (
                Structure {
                    identifier: ia,
                    object: oa,
                },
                Structure {
                    identifier: ib,
                    object: ob,
                },
            )
            | (
                Model {
                    identifier: ia,
                    object: oa,
                },
                Model {
                    identifier: ib,
                    object: ob,
                },
            ) => ia == ib && Arc::ptr_eq(oa, ob),
            _ => false,
        }
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        TypedValue::Int(v)
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        TypedValue::Float(v)
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        TypedValue::Bool(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        TypedValue::Str(v.to_string())
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        TypedValue::Str(v)
    }
}

impl From<DateTime<Utc>> for TypedValue {
    fn from(v: DateTime<Utc>) -> Self {
        TypedValue::Date(v)
    }
}

impl<T: Into<TypedValue>> From<Vec<T>> for TypedValue {
    fn from(v: Vec<T>) -> Self {
        TypedValue::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<TypedValue>> From<Option<T>> for TypedValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => TypedValue::Null,
        }
    }
}
