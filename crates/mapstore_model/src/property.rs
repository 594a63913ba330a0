//! Persistent property descriptors.

use crate::value::{Value, ValueType};
use std::fmt;
use std::sync::Arc;

/// Fetch strategy for association properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Load a proxy/collection reference, resolved on demand.
    Lazy,
    /// Load the associated instances eagerly.
    Eager,
}

/// Cascade configuration for association properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cascade {
    /// Propagate persist to the associated instances.
    pub persist: bool,
    /// Propagate delete to the associated instances.
    pub delete: bool,
}

impl Cascade {
    /// Cascade both persist and delete.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            persist: true,
            delete: true,
        }
    }

    /// Cascade persist only.
    #[must_use]
    pub const fn persist_only() -> Self {
        Self {
            persist: true,
            delete: false,
        }
    }

    /// No cascading.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            persist: false,
            delete: false,
        }
    }
}

/// Marshals custom-typed property values to and from their stored form.
///
/// Custom properties bypass the engine's standard value handling and
/// indexing entirely.
pub trait CustomMarshaller: Send + Sync {
    /// Converts a live property value into its stored representation.
    fn write(&self, value: &Value) -> Value;
    /// Converts a stored representation back into a live property value.
    fn read(&self, stored: &Value) -> Value;
}

/// The kind of a persistent property.
#[derive(Clone)]
pub enum PropertyKind {
    /// A scalar copied directly to/from the native entry.
    Simple,
    /// A collection of scalars copied directly to/from the native entry.
    Basic,
    /// A single-ended association to another entity.
    ToOne {
        /// Target entity name.
        target: String,
        /// Cascade configuration.
        cascade: Cascade,
        /// Fetch strategy on the read path.
        fetch: FetchStrategy,
        /// For bidirectional associations, the name of the inverse
        /// one-to-many property on the target entity.
        inverse: Option<String>,
    },
    /// A to-many association materialized through an association indexer.
    OneToMany {
        /// Target entity name.
        target: String,
        /// Cascade configuration.
        cascade: Cascade,
        /// Fetch strategy on the read path.
        fetch: FetchStrategy,
    },
    /// An embedded entity flattened into a nested sub-entry.
    Embedded {
        /// Target (embedded) entity name.
        target: String,
    },
    /// A custom-typed property handled by a pluggable marshaller.
    Custom {
        /// The marshaller converting to/from the stored form.
        marshaller: Arc<dyn CustomMarshaller>,
    },
}

impl fmt::Debug for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "Simple"),
            Self::Basic => write!(f, "Basic"),
            Self::ToOne {
                target, cascade, ..
            } => write!(f, "ToOne({target}, cascade={cascade:?})"),
            Self::OneToMany { target, .. } => write!(f, "OneToMany({target})"),
            Self::Embedded { target } => write!(f, "Embedded({target})"),
            Self::Custom { .. } => write!(f, "Custom"),
        }
    }
}

/// Descriptor for one persistent property of a mapped type.
#[derive(Debug, Clone)]
pub struct PersistentProperty {
    /// Property name on the live instance.
    pub name: String,
    /// Property kind.
    pub kind: PropertyKind,
    /// Override for the key name used in the native entry.
    pub target_name: Option<String>,
    /// Whether the property participates in manual value indexing.
    pub indexed: bool,
    /// Whether a null value is rejected at persist time.
    pub required: bool,
    /// Declared value shape, used by the conversion service on writes.
    pub value_type: Option<ValueType>,
}

impl PersistentProperty {
    /// Creates a simple scalar property.
    #[must_use]
    pub fn simple(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Simple,
            target_name: None,
            indexed: false,
            required: false,
            value_type: None,
        }
    }

    /// Creates a basic collection-of-scalars property.
    #[must_use]
    pub fn basic(name: impl Into<String>) -> Self {
        Self {
            kind: PropertyKind::Basic,
            ..Self::simple(name)
        }
    }

    /// Creates a to-one association property.
    #[must_use]
    pub fn to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: PropertyKind::ToOne {
                target: target.into(),
                cascade: Cascade::persist_only(),
                fetch: FetchStrategy::Lazy,
                inverse: None,
            },
            ..Self::simple(name)
        }
    }

    /// Creates a one-to-many association property.
    #[must_use]
    pub fn one_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: PropertyKind::OneToMany {
                target: target.into(),
                cascade: Cascade::persist_only(),
                fetch: FetchStrategy::Lazy,
            },
            ..Self::simple(name)
        }
    }

    /// Creates an embedded property.
    #[must_use]
    pub fn embedded(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: PropertyKind::Embedded {
                target: target.into(),
            },
            ..Self::simple(name)
        }
    }

    /// Creates a custom property with the given marshaller.
    #[must_use]
    pub fn custom(name: impl Into<String>, marshaller: Arc<dyn CustomMarshaller>) -> Self {
        Self {
            kind: PropertyKind::Custom { marshaller },
            ..Self::simple(name)
        }
    }

    /// Marks the property as indexed.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Marks the property as required (null rejected at persist time).
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Overrides the native entry key name.
    #[must_use]
    pub fn target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = Some(name.into());
        self
    }

    /// Declares the value shape for conversion on writes.
    #[must_use]
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    /// Sets the cascade configuration (association kinds only).
    #[must_use]
    pub fn cascade(mut self, new: Cascade) -> Self {
        match &mut self.kind {
            PropertyKind::ToOne { cascade, .. } | PropertyKind::OneToMany { cascade, .. } => {
                *cascade = new;
            }
            _ => {}
        }
        self
    }

    /// Sets the fetch strategy (association kinds only).
    #[must_use]
    pub fn fetch(mut self, new: FetchStrategy) -> Self {
        match &mut self.kind {
            PropertyKind::ToOne { fetch, .. } | PropertyKind::OneToMany { fetch, .. } => {
                *fetch = new;
            }
            _ => {}
        }
        self
    }

    /// Declares the inverse one-to-many property name on the target
    /// (bidirectional to-one associations only).
    #[must_use]
    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        if let PropertyKind::ToOne { inverse, .. } = &mut self.kind {
            *inverse = Some(name.into());
        }
        self
    }

    /// The key name used for this property in the native entry.
    #[must_use]
    pub fn entry_key(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.name)
    }

    /// Returns true if this is an association kind (to-one or to-many).
    #[must_use]
    pub fn is_association(&self) -> bool {
        matches!(
            self.kind,
            PropertyKind::ToOne { .. } | PropertyKind::OneToMany { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_key_defaults_to_name() {
        let prop = PersistentProperty::simple("age");
        assert_eq!(prop.entry_key(), "age");
    }

    #[test]
    fn entry_key_uses_override() {
        let prop = PersistentProperty::simple("age").target_name("person_age");
        assert_eq!(prop.entry_key(), "person_age");
    }

    #[test]
    fn builder_flags() {
        let prop = PersistentProperty::simple("name").indexed().required();
        assert!(prop.indexed);
        assert!(prop.required);
    }

    #[test]
    fn cascade_applies_to_associations_only() {
        let assoc = PersistentProperty::to_one("customer", "Customer").cascade(Cascade::all());
        match assoc.kind {
            PropertyKind::ToOne { cascade, .. } => assert!(cascade.delete),
            _ => panic!("expected to-one"),
        }

        let simple = PersistentProperty::simple("name").cascade(Cascade::all());
        assert!(matches!(simple.kind, PropertyKind::Simple));
    }
}
