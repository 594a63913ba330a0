//! Opaque entity identifiers.

use crate::entity::IdentityKind;
use crate::error::{ModelError, ModelResult};
use std::fmt;
use uuid::Uuid;

/// A serializable value uniquely identifying an entity instance within its
/// store.
///
/// The engine treats identities opaquely apart from equality, hashing and
/// caching. The concrete shape is backend-specific: key-value stores commonly
/// use UUIDs or sequences, document stores use string object ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Identity {
    /// 128-bit UUID key.
    Uuid(Uuid),
    /// Signed integer key (sequences, auto-increment).
    Int(i64),
    /// Text key.
    Text(String),
}

impl Identity {
    /// Creates a new random UUID identity.
    #[must_use]
    pub fn random() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    /// Returns the identity kind.
    #[must_use]
    pub fn kind(&self) -> IdentityKind {
        match self {
            Self::Uuid(_) => IdentityKind::Uuid,
            Self::Int(_) => IdentityKind::Int,
            Self::Text(_) => IdentityKind::Text,
        }
    }

    /// Converts this identity to the given kind.
    ///
    /// This mirrors the conversion a session performs before a cache lookup
    /// so that e.g. a textual key supplied by a caller matches an entity
    /// whose identifier is numeric.
    ///
    /// # Errors
    ///
    /// Returns a conversion error if the value cannot represent the target
    /// kind.
    pub fn convert_to(&self, kind: IdentityKind) -> ModelResult<Self> {
        if self.kind() == kind {
            return Ok(self.clone());
        }
        match (self, kind) {
            (Self::Text(s), IdentityKind::Uuid) => Uuid::parse_str(s)
                .map(Self::Uuid)
                .map_err(|_| ModelError::conversion(format!("text key {s:?}"), "uuid key")),
            (Self::Text(s), IdentityKind::Int) => s
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| ModelError::conversion(format!("text key {s:?}"), "int key")),
            (Self::Uuid(u), IdentityKind::Text) => Ok(Self::Text(u.to_string())),
            (Self::Int(i), IdentityKind::Text) => Ok(Self::Text(i.to_string())),
            (other, kind) => Err(ModelError::conversion(
                format!("{other}"),
                format!("{kind:?} key"),
            )),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Identity {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Uuid> for Identity {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}
