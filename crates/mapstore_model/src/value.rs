//! Dynamic property value type.

use crate::access::EntityRef;
use crate::identity::Identity;
use std::collections::BTreeMap;
use std::fmt;

/// A dynamic property value.
///
/// This is the currency in which entity properties are read and written by
/// the engine: accessor tables produce and consume `Value`s, and native
/// entries store them under mapped key names. Association-valued properties
/// use [`Value::Entity`] (a live instance or a lazy reference) in memory and
/// are resolved to [`Value::Id`] before an entry reaches a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Null / absent value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer (full i64 range).
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Text string (UTF-8).
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// An entity identity (stored association reference).
    Id(Identity),
    /// List of values.
    List(Vec<Value>),
    /// String-keyed map of values (embedded sub-entries).
    Map(BTreeMap<String, Value>),
    /// An association value: a live instance or a lazy proxy reference.
    Entity(EntityRef),
    /// An unresolved to-many collection backed by an association indexer.
    Collection(AssociationRef),
}

/// The declared shape of a property, used by the conversion service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// Signed integer.
    Int,
    /// Float.
    Float,
    /// Text.
    Text,
    /// Bytes.
    Bytes,
    /// Entity identity.
    Id,
    /// List of values.
    List,
    /// Map of values.
    Map,
    /// Association (entity or collection reference).
    Entity,
}

/// A deferred to-many collection: the owner's key plus the association it
/// belongs to. Resolved on demand through the backend's association indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationRef {
    /// Owning entity name.
    pub owner_entity: String,
    /// The association property name on the owner.
    pub property: String,
    /// The owner's identity.
    pub owner_key: Identity,
}

impl Value {
    /// Returns true if this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean value, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an `Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float value, if this is a `Float`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the text value, if this is a `Text`.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the byte string, if this is `Bytes`.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the identity, if this is an `Id`.
    #[must_use]
    pub fn as_id(&self) -> Option<&Identity> {
        match self {
            Self::Id(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the list, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map, if this is a `Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Returns the association reference, if this is an `Entity`.
    #[must_use]
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Returns a short name for the value's variant, for error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Id(_) => "id",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Entity(_) => "entity",
            Self::Collection(_) => "collection",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Id(id) => write!(f, "#{id}"),
            Self::List(items) => write!(f, "<list of {}>", items.len()),
            Self::Map(map) => write!(f, "<map of {}>", map.len()),
            Self::Entity(_) => write!(f, "<entity>"),
            Self::Collection(_) => write!(f, "<collection>"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Identity> for Value {
    fn from(value: Identity) -> Self {
        Self::Id(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
