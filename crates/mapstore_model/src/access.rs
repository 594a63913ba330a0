//! Uniform property access over live entity instances.
//!
//! Instances are held behind type-erased shared handles; reads and writes go
//! through per-type accessor tables registered when the mapping context is
//! built. The engine never inspects instance layout directly.

use crate::convert::ConversionService;
use crate::entity::PersistentEntity;
use crate::error::{ModelError, ModelResult};
use crate::identity::Identity;
use crate::value::Value;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A shared, type-erased handle to one live entity instance.
///
/// Handles clone cheaply and all clones reference the same instance, which
/// is what makes the session's identity map meaningful: two lookups for the
/// same key yield handles for which [`EntityHandle::same_instance`] is true.
#[derive(Clone)]
pub struct EntityHandle {
    entity_name: String,
    instance: Arc<RwLock<Box<dyn Any + Send + Sync>>>,
}

impl EntityHandle {
    /// Wraps an instance of the named entity type.
    #[must_use]
    pub fn new(entity_name: impl Into<String>, instance: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            entity_name: entity_name.into(),
            instance: Arc::new(RwLock::new(instance)),
        }
    }

    /// Returns the entity type name of the wrapped instance.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    /// Returns true if both handles reference the same instance.
    #[must_use]
    pub fn same_instance(&self, other: &EntityHandle) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }

    /// A stable per-instance token, usable as a map key for instance-scoped
    /// attributes. Valid only while at least one handle is alive.
    #[must_use]
    pub fn instance_token(&self) -> usize {
        Arc::as_ptr(&self.instance) as *const () as usize
    }

    /// Runs `f` against the instance downcast to `T`.
    ///
    /// Returns `None` if the instance is not a `T`.
    pub fn with_typed<T: 'static, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.instance.read();
        guard.downcast_ref::<T>().map(f)
    }

    /// Runs `f` against the instance downcast mutably to `T`.
    ///
    /// Returns `None` if the instance is not a `T`.
    pub fn with_typed_mut<T: 'static, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.instance.write();
        guard.downcast_mut::<T>().map(f)
    }

    fn read_with(&self, get: GetFn, property: &str) -> Option<Value> {
        let guard = self.instance.read();
        get(&**guard, property)
    }

    fn write_with(&self, set: SetFn, property: &str, value: Value) -> ModelResult<()> {
        let mut guard = self.instance.write();
        set(&mut **guard, property, value)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("entity_name", &self.entity_name)
            .field("instance", &format_args!("{:#x}", self.instance_token()))
            .finish()
    }
}

/// An association-valued reference: either a live instance or a lazy proxy
/// that records only the target type and key.
#[derive(Debug, Clone)]
pub enum EntityRef {
    /// A loaded (or new, not yet persisted) instance.
    Loaded(EntityHandle),
    /// An unresolved reference to a stored instance.
    Proxy {
        /// Target entity name.
        entity: String,
        /// Target identity.
        id: Identity,
    },
}

impl EntityRef {
    /// Returns the referenced entity type name.
    #[must_use]
    pub fn entity_name(&self) -> &str {
        match self {
            Self::Loaded(handle) => handle.entity_name(),
            Self::Proxy { entity, .. } => entity,
        }
    }

    /// Returns true if this is an unresolved proxy.
    #[must_use]
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy { .. })
    }

    /// Returns the proxy key without resolving, if this is a proxy.
    #[must_use]
    pub fn proxy_id(&self) -> Option<&Identity> {
        match self {
            Self::Proxy { id, .. } => Some(id),
            Self::Loaded(_) => None,
        }
    }

    /// Returns the loaded handle, if this reference is loaded.
    #[must_use]
    pub fn as_loaded(&self) -> Option<&EntityHandle> {
        match self {
            Self::Loaded(handle) => Some(handle),
            Self::Proxy { .. } => None,
        }
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Loaded(a), Self::Loaded(b)) => a.same_instance(b),
            (
                Self::Proxy { entity: ea, id: ia },
                Self::Proxy { entity: eb, id: ib },
            ) => ea == eb && ia == ib,
            _ => false,
        }
    }
}

type GetFn = fn(&(dyn Any + Send + Sync), &str) -> Option<Value>;
type SetFn = fn(&mut (dyn Any + Send + Sync), &str, Value) -> ModelResult<()>;

/// Per-type accessor table: constructs instances and reads/writes named
/// properties as dynamic values.
///
/// Tables are registered alongside the entity descriptor when the mapping
/// context is built, so property access needs no runtime type inspection
/// beyond a single downcast inside each function.
#[derive(Clone, Copy)]
pub struct Accessors {
    /// Constructs a default instance of the mapped type.
    pub construct: fn() -> Box<dyn Any + Send + Sync>,
    /// Reads a property value. `None` means the property name is unknown.
    pub get: GetFn,
    /// Writes a property value.
    pub set: SetFn,
}

impl fmt::Debug for Accessors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Accessors")
    }
}

/// Uniform read/write access to one instance of one mapped type.
///
/// Writes pass through the conversion service when the property declares a
/// value shape, so loosely-shaped values (text read back from a store, say)
/// land on the instance in the declared shape.
#[derive(Debug, Clone)]
pub struct EntityAccess {
    entity: Arc<PersistentEntity>,
    accessors: Arc<Accessors>,
    handle: EntityHandle,
    conversion: ConversionService,
}

impl EntityAccess {
    /// Creates access to an existing instance.
    #[must_use]
    pub fn new(
        entity: Arc<PersistentEntity>,
        accessors: Arc<Accessors>,
        handle: EntityHandle,
    ) -> Self {
        Self {
            entity,
            accessors,
            handle,
            conversion: ConversionService,
        }
    }

    /// Constructs a fresh default instance and returns access to it.
    #[must_use]
    pub fn create(entity: Arc<PersistentEntity>, accessors: Arc<Accessors>) -> Self {
        let instance = (accessors.construct)();
        let handle = EntityHandle::new(entity.name(), instance);
        Self::new(entity, accessors, handle)
    }

    /// Returns the entity descriptor.
    #[must_use]
    pub fn entity(&self) -> &Arc<PersistentEntity> {
        &self.entity
    }

    /// Returns the instance handle.
    #[must_use]
    pub fn handle(&self) -> &EntityHandle {
        &self.handle
    }

    /// Reads a property value.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::PropertyNotFound`] for unknown property names.
    pub fn get(&self, property: &str) -> ModelResult<Value> {
        self.handle
            .read_with(self.accessors.get, property)
            .ok_or_else(|| ModelError::property_not_found(self.entity.name(), property))
    }

    /// Writes a property value, converting to the declared shape first.
    ///
    /// # Errors
    ///
    /// Returns a conversion error if the value cannot represent the declared
    /// shape, or [`ModelError::PropertyNotFound`] for unknown names.
    pub fn set(&self, property: &str, value: Value) -> ModelResult<()> {
        let value = match self.entity.property(property).and_then(|p| p.value_type) {
            Some(target) => self.conversion.convert(value, target)?,
            None => value,
        };
        self.set_raw(property, value)
    }

    /// Writes a property value without conversion.
    ///
    /// # Errors
    ///
    /// Returns the accessor's error, typically a type mismatch or
    /// [`ModelError::PropertyNotFound`].
    pub fn set_raw(&self, property: &str, value: Value) -> ModelResult<()> {
        self.handle.write_with(self.accessors.set, property, value)
    }

    /// Returns the identifier property name.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NoIdentifier`] for embedded types.
    pub fn identifier_name(&self) -> ModelResult<&str> {
        self.entity
            .identity()
            .map(|i| i.name.as_str())
            .ok_or_else(|| ModelError::no_identifier(self.entity.name()))
    }

    /// Reads the instance's identifier, or `None` if unset.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NoIdentifier`] for embedded types and a type
    /// mismatch if the identifier property holds a non-key value.
    pub fn identifier(&self) -> ModelResult<Option<Identity>> {
        let name = self.identifier_name()?;
        match self.get(name)? {
            Value::Null => Ok(None),
            Value::Id(id) => Ok(Some(id)),
            other => Err(ModelError::type_mismatch(
                self.entity.name(),
                name,
                format!("expected a key value, found {}", other.type_name()),
            )),
        }
    }

    /// Writes the instance's identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NoIdentifier`] for embedded types.
    pub fn set_identifier(&self, id: Identity) -> ModelResult<()> {
        let name = self.identifier_name()?.to_string();
        self.set_raw(&name, Value::Id(id))
    }

    /// Reads the version property, if the entity maps one and it is set.
    #[must_use]
    pub fn version(&self) -> Option<i64> {
        let name = self.entity.version_name()?;
        self.get(name).ok().and_then(|v| v.as_i64())
    }

    /// Writes the version property, if the entity maps one.
    ///
    /// # Errors
    ///
    /// Returns the accessor's error on a failed write.
    pub fn set_version(&self, version: i64) -> ModelResult<()> {
        match self.entity.version_name() {
            Some(name) => {
                let name = name.to_string();
                self.set_raw(&name, Value::Int(version))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityBuilder, IdGenerator, IdentityKind};
    use crate::property::PersistentProperty;
    use crate::value::ValueType;

    #[derive(Default)]
    struct Person {
        id: Option<Identity>,
        name: String,
        age: i64,
    }

    fn construct() -> Box<dyn Any + Send + Sync> {
        Box::new(Person::default())
    }

    fn get(instance: &(dyn Any + Send + Sync), property: &str) -> Option<Value> {
        let person = instance.downcast_ref::<Person>()?;
        match property {
            "id" => Some(person.id.clone().map_or(Value::Null, Value::Id)),
            "name" => Some(Value::Text(person.name.clone())),
            "age" => Some(Value::Int(person.age)),
            _ => None,
        }
    }

    fn set(instance: &mut (dyn Any + Send + Sync), property: &str, value: Value) -> ModelResult<()> {
        let person = instance
            .downcast_mut::<Person>()
            .ok_or_else(|| ModelError::type_mismatch("Person", property, "wrong instance type"))?;
        match (property, value) {
            ("id", Value::Id(id)) => person.id = Some(id),
            ("id", Value::Null) => person.id = None,
            ("name", Value::Text(s)) => person.name = s,
            ("age", Value::Int(i)) => person.age = i,
            (name, other) => {
                return Err(ModelError::type_mismatch(
                    "Person",
                    name,
                    format!("unexpected {}", other.type_name()),
                ))
            }
        }
        Ok(())
    }

    fn person_access() -> EntityAccess {
        let entity = Arc::new(
            EntityBuilder::new("Person")
                .identity("id", IdentityKind::Uuid, IdGenerator::Assigned)
                .property(PersistentProperty::simple("name").value_type(ValueType::Text))
                .property(PersistentProperty::simple("age").value_type(ValueType::Int))
                .build(),
        );
        let accessors = Arc::new(Accessors { construct, get, set });
        EntityAccess::create(entity, accessors)
    }

    #[test]
    fn get_and_set() {
        let access = person_access();
        access.set("name", Value::Text("Ada".into())).unwrap();
        assert_eq!(access.get("name").unwrap(), Value::Text("Ada".into()));
    }

    #[test]
    fn set_converts_to_declared_shape() {
        let access = person_access();
        access.set("age", Value::Text("30".into())).unwrap();
        assert_eq!(access.get("age").unwrap(), Value::Int(30));
    }

    #[test]
    fn unknown_property() {
        let access = person_access();
        assert!(matches!(
            access.get("missing"),
            Err(ModelError::PropertyNotFound { .. })
        ));
    }

    #[test]
    fn identifier_roundtrip() {
        let access = person_access();
        assert_eq!(access.identifier().unwrap(), None);
        let id = Identity::random();
        access.set_identifier(id.clone()).unwrap();
        assert_eq!(access.identifier().unwrap(), Some(id));
    }

    #[test]
    fn handles_share_instance() {
        let access = person_access();
        let other = access.handle().clone();
        assert!(access.handle().same_instance(&other));
        other
            .with_typed_mut::<Person, _>(|p| p.age = 9)
            .unwrap();
        assert_eq!(access.get("age").unwrap(), Value::Int(9));
    }

    #[test]
    fn proxy_refs_compare_by_key() {
        let a = EntityRef::Proxy {
            entity: "Person".into(),
            id: Identity::Int(1),
        };
        let b = EntityRef::Proxy {
            entity: "Person".into(),
            id: Identity::Int(1),
        };
        assert_eq!(a, b);
        let loaded = EntityRef::Loaded(person_access().handle().clone());
        assert_ne!(a, loaded);
    }
}
