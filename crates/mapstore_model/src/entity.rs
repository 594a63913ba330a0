//! Mapped-type descriptors.

use crate::property::{PersistentProperty, PropertyKind};
use std::collections::HashMap;

/// The concrete shape of entity identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// 128-bit UUID keys.
    Uuid,
    /// Signed integer keys.
    Int,
    /// Text keys.
    Text,
}

/// How identifier values are produced at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenerator {
    /// The application assigns identifiers before persisting.
    Assigned,
    /// The backend generates identifiers as part of the insert.
    Store,
}

/// The identifier mapping of an entity.
#[derive(Debug, Clone)]
pub struct IdentityMapping {
    /// Identifier property name.
    pub name: String,
    /// Identifier value shape.
    pub kind: IdentityKind,
    /// Identifier generation strategy.
    pub generator: IdGenerator,
}

/// Immutable descriptor for one mapped type: its name, store family,
/// identifier mapping, optional version property and persistent properties.
///
/// Descriptors are built once at context construction and shared behind
/// `Arc` thereafter.
#[derive(Debug)]
pub struct PersistentEntity {
    name: String,
    family: String,
    identity: Option<IdentityMapping>,
    version_name: Option<String>,
    parent: Option<String>,
    stateless: bool,
    properties: Vec<PersistentProperty>,
    by_name: HashMap<String, usize>,
}

impl PersistentEntity {
    /// Returns the entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the store family (collection/table) the entity maps to.
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Returns the identifier mapping, or `None` for embedded types.
    #[must_use]
    pub fn identity(&self) -> Option<&IdentityMapping> {
        self.identity.as_ref()
    }

    /// Returns the version property name, if optimistic locking is mapped.
    #[must_use]
    pub fn version_name(&self) -> Option<&str> {
        self.version_name.as_deref()
    }

    /// Returns true if the entity maps a version property.
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.version_name.is_some()
    }

    /// Returns the parent entity name in an inheritance hierarchy.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Returns true if instances bypass session caching and dirty checking.
    #[must_use]
    pub fn is_stateless(&self) -> bool {
        self.stateless
    }

    /// Returns true if the entity has no identifier mapping (embedded only).
    #[must_use]
    pub fn is_embeddable(&self) -> bool {
        self.identity.is_none()
    }

    /// Returns the persistent properties in declaration order.
    #[must_use]
    pub fn properties(&self) -> &[PersistentProperty] {
        &self.properties
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PersistentProperty> {
        self.by_name.get(name).map(|&i| &self.properties[i])
    }

    /// Returns the name of the one-to-many property on this entity that is
    /// the inverse side of the named to-one association on `owner`.
    #[must_use]
    pub fn inverse_collection_of(&self, owner: &PersistentEntity) -> Option<&PersistentProperty> {
        self.properties.iter().find(|p| {
            matches!(&p.kind, PropertyKind::OneToMany { target, .. } if target == owner.name())
        })
    }
}

/// Builder for [`PersistentEntity`] descriptors.
#[derive(Debug)]
pub struct EntityBuilder {
    name: String,
    family: Option<String>,
    identity: Option<IdentityMapping>,
    version_name: Option<String>,
    parent: Option<String>,
    stateless: bool,
    properties: Vec<PersistentProperty>,
}

impl EntityBuilder {
    /// Starts a descriptor for the named entity.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family: None,
            identity: None,
            version_name: None,
            parent: None,
            stateless: false,
            properties: Vec::new(),
        }
    }

    /// Overrides the store family. Defaults to the entity name.
    #[must_use]
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Maps the identifier property.
    #[must_use]
    pub fn identity(
        mut self,
        name: impl Into<String>,
        kind: IdentityKind,
        generator: IdGenerator,
    ) -> Self {
        self.identity = Some(IdentityMapping {
            name: name.into(),
            kind,
            generator,
        });
        self
    }

    /// Maps a version property for optimistic locking.
    #[must_use]
    pub fn version(mut self, name: impl Into<String>) -> Self {
        self.version_name = Some(name.into());
        self
    }

    /// Declares the parent entity in an inheritance hierarchy.
    #[must_use]
    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.parent = Some(name.into());
        self
    }

    /// Marks instances as stateless (no session caching or dirty checking).
    #[must_use]
    pub const fn stateless(mut self) -> Self {
        self.stateless = true;
        self
    }

    /// Adds a persistent property.
    #[must_use]
    pub fn property(mut self, property: PersistentProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> PersistentEntity {
        let family = self.family.unwrap_or_else(|| self.name.clone());
        let by_name = self
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.name.clone(), i))
            .collect();
        PersistentEntity {
            name: self.name,
            family,
            identity: self.identity,
            version_name: self.version_name,
            parent: self.parent,
            stateless: self.stateless,
            properties: self.properties,
            by_name,
        }
    }
}
