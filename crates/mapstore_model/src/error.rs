//! Error types for the mapping model.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur in the mapping model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The requested type is not registered with the mapping context.
    #[error("unknown entity type: {name}")]
    UnknownEntity {
        /// Name of the unregistered type.
        name: String,
    },

    /// An unknown property name was passed to an entity accessor.
    #[error("property not found: {entity}.{property}")]
    PropertyNotFound {
        /// Entity name.
        entity: String,
        /// The missing property name.
        property: String,
    },

    /// A value could not be converted to the property's declared type.
    #[error("cannot convert {from} to {to}")]
    Conversion {
        /// Source value description.
        from: String,
        /// Target type description.
        to: String,
    },

    /// A property write received a value of the wrong shape.
    #[error("type mismatch for {entity}.{property}: {message}")]
    TypeMismatch {
        /// Entity name.
        entity: String,
        /// Property name.
        property: String,
        /// Description of the mismatch.
        message: String,
    },

    /// The entity has no identifier property (embedded types).
    #[error("entity {name} has no identifier")]
    NoIdentifier {
        /// Entity name.
        name: String,
    },
}

impl ModelError {
    /// Creates an unknown-entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Creates a property-not-found error.
    pub fn property_not_found(entity: impl Into<String>, property: impl Into<String>) -> Self {
        Self::PropertyNotFound {
            entity: entity.into(),
            property: property.into(),
        }
    }

    /// Creates a conversion error.
    pub fn conversion(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Conversion {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a type-mismatch error.
    pub fn type_mismatch(
        entity: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            entity: entity.into(),
            property: property.into(),
            message: message.into(),
        }
    }

    /// Creates a no-identifier error.
    pub fn no_identifier(name: impl Into<String>) -> Self {
        Self::NoIdentifier { name: name.into() }
    }
}
