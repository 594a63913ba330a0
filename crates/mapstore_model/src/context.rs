//! The process-wide registry of mapped types.

use crate::access::{Accessors, EntityAccess, EntityHandle};
use crate::entity::PersistentEntity;
use crate::error::{ModelError, ModelResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Registration {
    entity: Arc<PersistentEntity>,
    accessors: Arc<Accessors>,
}

/// Registry of entity descriptors and their accessor tables.
///
/// A context is built once at startup, shared behind `Arc`, and consulted by
/// every session for descriptor and accessor lookups. Registration after
/// sessions exist is allowed but is expected only in tests.
#[derive(Debug, Default)]
pub struct MappingContext {
    registrations: RwLock<HashMap<String, Registration>>,
}

impl MappingContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mapped type with its accessor table.
    ///
    /// Re-registering a name replaces the previous registration.
    pub fn register(&self, entity: PersistentEntity, accessors: Accessors) {
        let name = entity.name().to_string();
        self.registrations.write().insert(
            name,
            Registration {
                entity: Arc::new(entity),
                accessors: Arc::new(accessors),
            },
        );
    }

    /// Returns true if the named type is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.registrations.read().contains_key(name)
    }

    /// Looks up an entity descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownEntity`] if the name is not registered.
    pub fn entity(&self, name: &str) -> ModelResult<Arc<PersistentEntity>> {
        self.registrations
            .read()
            .get(name)
            .map(|r| Arc::clone(&r.entity))
            .ok_or_else(|| ModelError::unknown_entity(name))
    }

    /// Looks up an accessor table.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownEntity`] if the name is not registered.
    pub fn accessors(&self, name: &str) -> ModelResult<Arc<Accessors>> {
        self.registrations
            .read()
            .get(name)
            .map(|r| Arc::clone(&r.accessors))
            .ok_or_else(|| ModelError::unknown_entity(name))
    }

    /// Returns access to an existing instance via its handle.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownEntity`] if the handle's type is not
    /// registered.
    pub fn access(&self, handle: &EntityHandle) -> ModelResult<EntityAccess> {
        let guard = self.registrations.read();
        let registration = guard
            .get(handle.entity_name())
            .ok_or_else(|| ModelError::unknown_entity(handle.entity_name()))?;
        Ok(EntityAccess::new(
            Arc::clone(&registration.entity),
            Arc::clone(&registration.accessors),
            handle.clone(),
        ))
    }

    /// Constructs a fresh default instance of the named type.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownEntity`] if the name is not registered.
    pub fn create(&self, name: &str) -> ModelResult<EntityAccess> {
        let guard = self.registrations.read();
        let registration = guard
            .get(name)
            .ok_or_else(|| ModelError::unknown_entity(name))?;
        Ok(EntityAccess::create(
            Arc::clone(&registration.entity),
            Arc::clone(&registration.accessors),
        ))
    }

    /// Returns the registered entity names.
    #[must_use]
    pub fn entity_names(&self) -> Vec<String> {
        self.registrations.read().keys().cloned().collect()
    }
}
