//! The generic native-entry mapping engine.
//!
//! [`NativeEntryPersister`] translates live instances to and from native
//! entries for any [`NativeEntryStore`]. It owns the property-kind handling
//! (simple values, embedded flattening, association cascades, custom
//! marshalling), identifier strategies, version bookkeeping and the index
//! maintenance deltas that accompany each write. Backend adapters supply
//! only the store strategy; they never see instances.

use crate::backend::NativeEntryStore;
use crate::error::{CoreResult, DatastoreError};
use crate::pending::{KeyedOp, OperationKind, PendingOperation};
use crate::session::Session;
use mapstore_model::{
    AssociationRef, EntityAccess, EntityHandle, EntityRef, FetchStrategy, IdGenerator, Identity,
    MappingContext, ModelError, NativeEntry, PersistentEntity, PersistentProperty, PropertyKind,
    SharedEntry, Value,
};
use std::sync::Arc;

/// Persistence operations for one mapped type.
pub trait Persister: Send + Sync {
    /// Returns the descriptor of the type this persister handles.
    fn entity(&self) -> &Arc<PersistentEntity>;

    /// Queues a write for the instance and returns its key.
    fn persist(&self, session: &mut Session, handle: &EntityHandle) -> CoreResult<Identity>;

    /// Queues writes for a batch of instances.
    fn persist_all(
        &self,
        session: &mut Session,
        handles: &[EntityHandle],
    ) -> CoreResult<Vec<Identity>> {
        handles
            .iter()
            .map(|handle| self.persist(session, handle))
            .collect()
    }

    /// Loads the instance stored under the key, consulting the session's
    /// first-level cache first.
    fn retrieve(&self, session: &mut Session, key: &Identity) -> CoreResult<Option<EntityHandle>>;

    /// Loads a batch of instances, position-aligned with the input keys.
    fn retrieve_all(
        &self,
        session: &mut Session,
        keys: &[Identity],
    ) -> CoreResult<Vec<Option<EntityHandle>>>;

    /// Queues removal of the instance and its delete-cascaded associations.
    fn delete(&self, session: &mut Session, handle: &EntityHandle) -> CoreResult<()>;

    /// Queues removal of the instance stored under the key, without loading
    /// it.
    fn delete_by_key(&self, session: &mut Session, key: &Identity) -> CoreResult<()>;

    /// Returns an unresolved reference to the instance stored under the key.
    fn proxy(&self, key: Identity) -> EntityRef;
}

/// Everything produced by one pass over an instance's properties: the entry
/// under construction, index deltas, and deferred association work that
/// needs the owner's key.
struct BuiltEntry {
    entry: SharedEntry,
    to_index: Vec<(String, Value)>,
    to_unindex: Vec<(String, Value)>,
    post_ops: Vec<KeyedOp>,
}

/// The mapping engine for one entity over one backend store.
pub struct NativeEntryPersister {
    entity: Arc<PersistentEntity>,
    context: Arc<MappingContext>,
    store: Arc<dyn NativeEntryStore>,
}

impl NativeEntryPersister {
    /// Creates a persister for the entity over the given store.
    #[must_use]
    pub fn new(
        entity: Arc<PersistentEntity>,
        context: Arc<MappingContext>,
        store: Arc<dyn NativeEntryStore>,
    ) -> Self {
        Self {
            entity,
            context,
            store,
        }
    }

    fn insert_instance(
        &self,
        session: &mut Session,
        handle: &EntityHandle,
        access: &EntityAccess,
        existing: Option<Identity>,
    ) -> CoreResult<Identity> {
        let built = self.build_entry(session, access, None)?;
        if self.entity.parent().is_some() {
            built
                .entry
                .lock()
                .put("$type", Value::Text(self.entity.name().to_string()));
        }
        if let Some(version_name) = self.entity.version_name() {
            access.set_version(0)?;
            built.entry.lock().put(version_name, Value::Int(0));
        }

        let key = if let Some(key) = existing {
            key
        } else if let Some(key) = self.store.generate_identifier(&self.entity) {
            access.set_identifier(key.clone())?;
            key
        } else {
            return self.insert_immediately(session, handle, access, built);
        };

        tracing::trace!(entity = self.entity.name(), key = %key, "queueing insert");
        session.cache_instance(self.entity.name(), key.clone(), handle.clone());
        let mut op = PendingOperation::insert(
            Arc::clone(&self.entity),
            key.clone(),
            built.entry.clone(),
            handle.clone(),
            Arc::clone(&self.store),
        );
        op.set_on_complete(completion_op(
            Arc::clone(&self.entity),
            Arc::clone(&self.store),
            handle.clone(),
            built.entry,
            built.to_index,
            built.to_unindex,
        ));
        for post in built.post_ops {
            op.add_cascade_operation(post);
        }
        session.queue(op)?;
        Ok(key)
    }

    /// Insert path for stores that assign identifiers at write time: the
    /// write cannot be deferred because the key is needed now.
    fn insert_immediately(
        &self,
        session: &mut Session,
        handle: &EntityHandle,
        access: &EntityAccess,
        built: BuiltEntry,
    ) -> CoreResult<Identity> {
        if session.interceptors_veto(OperationKind::Insert, &self.entity, Some(handle)) {
            return Err(DatastoreError::vetoed(self.entity.name()));
        }
        let snapshot = built.entry.snapshot();
        let key = self.store.store_entry_assigning_key(&self.entity, &snapshot)?;
        tracing::debug!(entity = self.entity.name(), key = %key, "immediate insert with store-assigned key");
        access.set_identifier(key.clone())?;
        let complete = completion_op(
            Arc::clone(&self.entity),
            Arc::clone(&self.store),
            handle.clone(),
            built.entry,
            built.to_index,
            built.to_unindex,
        );
        complete(session, &key)?;
        for post in built.post_ops {
            post(session, &key)?;
        }
        Ok(key)
    }

    fn update_instance(
        &self,
        session: &mut Session,
        handle: &EntityHandle,
        access: &EntityAccess,
        key: Identity,
    ) -> CoreResult<Identity> {
        let baseline = session.baseline(self.entity.name(), &key);
        if !session.is_stateless() {
            if let Some(base) = &baseline {
                if !self.is_dirty_against(access, base)? {
                    return Ok(key);
                }
            }
        }

        let built = self.build_entry(session, access, baseline.as_ref())?;
        if self.entity.parent().is_some() {
            built
                .entry
                .lock()
                .put("$type", Value::Text(self.entity.name().to_string()));
        }
        let expected_version = match self.entity.version_name() {
            Some(version_name) => {
                let current = access.version().unwrap_or(0);
                built.entry.lock().put(version_name, Value::Int(current + 1));
                Some(current)
            }
            None => None,
        };

        tracing::trace!(entity = self.entity.name(), key = %key, "queueing update");
        let mut op = PendingOperation::update(
            Arc::clone(&self.entity),
            key.clone(),
            built.entry.clone(),
            handle.clone(),
            Arc::clone(&self.store),
            expected_version,
        );
        let complete = completion_op(
            Arc::clone(&self.entity),
            Arc::clone(&self.store),
            handle.clone(),
            built.entry,
            built.to_index,
            built.to_unindex,
        );
        // The instance's version only advances once the write lands; a
        // vetoed or failed update must leave it matching the store.
        let next_version = expected_version.map(|version| version + 1);
        let context = Arc::clone(&self.context);
        let versioned = handle.clone();
        op.set_on_complete(Box::new(move |session: &mut Session, key: &Identity| {
            if let Some(version) = next_version {
                context.access(&versioned)?.set_version(version)?;
            }
            complete(session, key)
        }));
        for post in built.post_ops {
            op.add_cascade_operation(post);
        }
        session.queue(op)?;
        Ok(key)
    }

    /// Walks the instance's properties into a native entry, collecting index
    /// deltas and deferred association work. Cascade-persisted children are
    /// queued here, before the owner, which is what keeps the flush order
    /// safe for owner-to-child references.
    fn build_entry(
        &self,
        session: &mut Session,
        access: &EntityAccess,
        baseline: Option<&NativeEntry>,
    ) -> CoreResult<BuiltEntry> {
        let mut entry = self.store.create_entry(&self.entity);
        let mut to_index = Vec::new();
        let mut to_unindex = Vec::new();
        let mut post_ops: Vec<KeyedOp> = Vec::new();

        for prop in self.entity.properties() {
            let entry_key = prop.entry_key();
            match &prop.kind {
                PropertyKind::Simple | PropertyKind::Basic => {
                    let value = access.get(&prop.name)?;
                    self.check_required(prop, &value)?;
                    if prop.indexed {
                        let old = baseline.and_then(|b| b.get(entry_key));
                        if old.is_some_and(|old| *old != value) {
                            if let Some(old) = old {
                                to_unindex.push((prop.name.clone(), old.clone()));
                            }
                        }
                        to_index.push((prop.name.clone(), value.clone()));
                    }
                    entry.put(entry_key, value);
                }
                PropertyKind::Custom { marshaller } => {
                    let value = access.get(&prop.name)?;
                    self.check_required(prop, &value)?;
                    entry.put(entry_key, marshaller.write(&value));
                }
                PropertyKind::Embedded { target } => {
                    match access.get(&prop.name)? {
                        Value::Null => {}
                        Value::Entity(EntityRef::Loaded(embedded)) => {
                            let sub = self.build_embedded(target, &embedded)?;
                            entry.put_entry(entry_key, sub);
                        }
                        other => {
                            return Err(self.mismatch(prop, "an embedded instance", &other));
                        }
                    }
                    if prop.required && entry.get(entry_key).is_none() {
                        return Err(self.required_violation(prop));
                    }
                }
                PropertyKind::ToOne {
                    target,
                    cascade,
                    inverse,
                    ..
                } => {
                    let value = access.get(&prop.name)?;
                    let child_key =
                        self.to_one_key(session, prop, target, cascade.persist, &value)?;
                    match child_key {
                        Some(child_key) => {
                            if prop.indexed {
                                let new = Value::Id(child_key.clone());
                                let old = baseline.and_then(|b| b.get(entry_key));
                                if old.is_some_and(|old| *old != new) {
                                    if let Some(old) = old {
                                        to_unindex.push((prop.name.clone(), old.clone()));
                                    }
                                }
                                to_index.push((prop.name.clone(), new));
                            }
                            entry.put(entry_key, Value::Id(child_key.clone()));
                            if let Some(inverse) = inverse {
                                post_ops.push(self.inverse_index_op(
                                    target,
                                    inverse,
                                    child_key,
                                )?);
                            }
                        }
                        None if prop.required => return Err(self.required_violation(prop)),
                        None => {}
                    }
                }
                PropertyKind::OneToMany { target, cascade, .. } => {
                    match access.get(&prop.name)? {
                        // An unresolved collection was never touched; the
                        // index already reflects the store.
                        Value::Null | Value::Collection(_) => {}
                        Value::List(items) => {
                            let mut child_keys = Vec::with_capacity(items.len());
                            for item in &items {
                                if let Some(child_key) = self.to_one_key(
                                    session,
                                    prop,
                                    target,
                                    cascade.persist,
                                    item,
                                )? {
                                    child_keys.push(child_key);
                                }
                            }
                            post_ops.push(self.collection_index_op(prop, child_keys));
                        }
                        other => {
                            return Err(self.mismatch(prop, "a list of instances", &other));
                        }
                    }
                }
            }
        }

        Ok(BuiltEntry {
            entry: SharedEntry::new(entry),
            to_index,
            to_unindex,
            post_ops,
        })
    }

    /// Resolves one association value to a child key, cascading the persist
    /// when requested. Proxies and raw keys short-circuit: they already name
    /// a stored instance.
    fn to_one_key(
        &self,
        session: &mut Session,
        prop: &PersistentProperty,
        target: &str,
        cascade_persist: bool,
        value: &Value,
    ) -> CoreResult<Option<Identity>> {
        match value {
            Value::Null => Ok(None),
            Value::Id(id) => Ok(Some(id.clone())),
            Value::Entity(EntityRef::Proxy { id, .. }) => Ok(Some(id.clone())),
            Value::Entity(EntityRef::Loaded(child)) => {
                if cascade_persist {
                    Ok(Some(session.persist(child)?))
                } else {
                    let child_access = self.context.access(child)?;
                    let id = child_access.identifier()?.ok_or_else(|| {
                        DatastoreError::data_integrity(format!(
                            "{}.{} references an unsaved {target} and does not cascade",
                            self.entity.name(),
                            prop.name
                        ))
                    })?;
                    Ok(Some(id))
                }
            }
            other => Err(self.mismatch(prop, "an instance reference", other)),
        }
    }

    /// Deferred work adding the owner to the inverse collection index on the
    /// child side of a bidirectional to-one association.
    fn inverse_index_op(
        &self,
        target: &str,
        inverse: &str,
        child_key: Identity,
    ) -> CoreResult<KeyedOp> {
        let child_entity = self.context.entity(target)?;
        let store = Arc::clone(&self.store);
        let inverse = inverse.to_string();
        Ok(Box::new(move |_session: &mut Session, owner_key: &Identity| {
            let Some(prop) = child_entity.property(&inverse) else {
                return Ok(());
            };
            let Some(indexer) = store.association_indexer(&child_entity, prop) else {
                return Ok(());
            };
            let mut children = indexer.query(&child_key)?;
            if !children.contains(owner_key) {
                children.push(owner_key.clone());
                indexer.index(&child_key, &children)?;
            }
            Ok(())
        }))
    }

    /// Deferred work replacing the association index for a to-many property
    /// once the owner's key is known.
    fn collection_index_op(&self, prop: &PersistentProperty, child_keys: Vec<Identity>) -> KeyedOp {
        let entity = Arc::clone(&self.entity);
        let store = Arc::clone(&self.store);
        let prop_name = prop.name.clone();
        Box::new(move |_session: &mut Session, owner_key: &Identity| {
            let Some(prop) = entity.property(&prop_name) else {
                return Ok(());
            };
            if let Some(indexer) = store.association_indexer(&entity, prop) {
                indexer.index(owner_key, &child_keys)?;
            }
            Ok(())
        })
    }

    /// Flattens an embedded instance into a nested sub-entry. Embedded
    /// types carry no key and no cascades; association values inside them
    /// are stored by key only.
    fn build_embedded(&self, target: &str, handle: &EntityHandle) -> CoreResult<NativeEntry> {
        let entity = self.context.entity(target)?;
        let access = self.context.access(handle)?;
        let mut entry = NativeEntry::new(entity.family());
        for prop in entity.properties() {
            let entry_key = prop.entry_key();
            match &prop.kind {
                PropertyKind::Simple | PropertyKind::Basic => {
                    entry.put(entry_key, access.get(&prop.name)?);
                }
                PropertyKind::Custom { marshaller } => {
                    entry.put(entry_key, marshaller.write(&access.get(&prop.name)?));
                }
                PropertyKind::Embedded { target } => {
                    if let Value::Entity(EntityRef::Loaded(nested)) = access.get(&prop.name)? {
                        let sub = self.build_embedded(target, &nested)?;
                        entry.put_entry(entry_key, sub);
                    }
                }
                PropertyKind::ToOne { .. } => match access.get(&prop.name)? {
                    Value::Id(id) | Value::Entity(EntityRef::Proxy { id, .. }) => {
                        entry.put(entry_key, Value::Id(id));
                    }
                    Value::Entity(EntityRef::Loaded(child)) => {
                        if let Some(id) = self.context.access(&child)?.identifier()? {
                            entry.put(entry_key, Value::Id(id));
                        }
                    }
                    _ => {}
                },
                PropertyKind::OneToMany { .. } => {}
            }
        }
        Ok(entry)
    }

    /// Reconstructs an embedded instance from its nested sub-entry.
    fn read_embedded(&self, target: &str, entry: &NativeEntry) -> CoreResult<EntityHandle> {
        let entity = self.context.entity(target)?;
        let access = self.context.create(target)?;
        for prop in entity.properties() {
            let entry_key = prop.entry_key();
            match &prop.kind {
                PropertyKind::Simple | PropertyKind::Basic => {
                    if let Some(value) = entry.get(entry_key) {
                        access.set(&prop.name, value.clone())?;
                    }
                }
                PropertyKind::Custom { marshaller } => {
                    if let Some(value) = entry.get(entry_key) {
                        access.set_raw(&prop.name, marshaller.read(value))?;
                    }
                }
                PropertyKind::Embedded { target } => {
                    if let Some(sub) = entry.get_entry(entry_key, target) {
                        let nested = self.read_embedded(target, &sub)?;
                        access.set_raw(&prop.name, Value::Entity(EntityRef::Loaded(nested)))?;
                    }
                }
                PropertyKind::ToOne { target, .. } => {
                    if let Some(Value::Id(id)) = entry.get(entry_key) {
                        access.set_raw(
                            &prop.name,
                            Value::Entity(EntityRef::Proxy {
                                entity: target.clone(),
                                id: id.clone(),
                            }),
                        )?;
                    }
                }
                PropertyKind::OneToMany { .. } => {}
            }
        }
        Ok(access.handle().clone())
    }

    /// Builds an instance from a stored entry, caching it before filling
    /// associations so cyclic eager references terminate.
    fn instantiate(
        &self,
        session: &mut Session,
        key: &Identity,
        entry: &NativeEntry,
    ) -> CoreResult<EntityHandle> {
        let stored_type = entry
            .get("$type")
            .and_then(Value::as_text)
            .map(str::to_string);
        let (entity, access) = match stored_type {
            Some(name) if name != self.entity.name() && self.context.contains(&name) => {
                (self.context.entity(&name)?, self.context.create(&name)?)
            }
            _ => (
                Arc::clone(&self.entity),
                self.context.create(self.entity.name())?,
            ),
        };
        access.set_identifier(key.clone())?;
        session.cache_instance(entity.name(), key.clone(), access.handle().clone());
        session.set_baseline(entity.name(), key.clone(), entry.clone());
        self.apply_entry(session, &entity, &access, key, entry)?;
        Ok(access.handle().clone())
    }

    /// Fills an instance's properties from a stored entry.
    fn apply_entry(
        &self,
        session: &mut Session,
        entity: &Arc<PersistentEntity>,
        access: &EntityAccess,
        key: &Identity,
        entry: &NativeEntry,
    ) -> CoreResult<()> {
        if let Some(version_name) = entity.version_name() {
            if let Some(version) = entry.get(version_name).and_then(Value::as_i64) {
                access.set_version(version)?;
            }
        }
        for prop in entity.properties() {
            let entry_key = prop.entry_key();
            match &prop.kind {
                PropertyKind::Simple | PropertyKind::Basic => {
                    if let Some(value) = entry.get(entry_key) {
                        access.set(&prop.name, value.clone())?;
                    }
                }
                PropertyKind::Custom { marshaller } => {
                    if let Some(value) = entry.get(entry_key) {
                        access.set_raw(&prop.name, marshaller.read(value))?;
                    }
                }
                PropertyKind::Embedded { target } => {
                    if let Some(sub) = entry.get_entry(entry_key, target) {
                        let embedded = self.read_embedded(target, &sub)?;
                        access.set_raw(&prop.name, Value::Entity(EntityRef::Loaded(embedded)))?;
                    }
                }
                PropertyKind::ToOne { target, fetch, .. } => {
                    if let Some(Value::Id(id)) = entry.get(entry_key) {
                        let value = match fetch {
                            FetchStrategy::Lazy => Value::Entity(EntityRef::Proxy {
                                entity: target.clone(),
                                id: id.clone(),
                            }),
                            FetchStrategy::Eager => match session.retrieve(target, id)? {
                                Some(child) => Value::Entity(EntityRef::Loaded(child)),
                                None => Value::Null,
                            },
                        };
                        access.set_raw(&prop.name, value)?;
                    }
                }
                PropertyKind::OneToMany { target, fetch, .. } => {
                    let value = match fetch {
                        FetchStrategy::Lazy => Value::Collection(AssociationRef {
                            owner_entity: entity.name().to_string(),
                            property: prop.name.clone(),
                            owner_key: key.clone(),
                        }),
                        FetchStrategy::Eager => {
                            let child_keys = self
                                .store
                                .association_indexer(entity, prop)
                                .map(|indexer| indexer.query(key))
                                .transpose()?
                                .unwrap_or_default();
                            let children = session.retrieve_all(target, &child_keys)?;
                            Value::List(
                                children
                                    .into_iter()
                                    .flatten()
                                    .map(|child| Value::Entity(EntityRef::Loaded(child)))
                                    .collect(),
                            )
                        }
                    };
                    access.set_raw(&prop.name, value)?;
                }
            }
        }
        Ok(())
    }

    /// Re-reads the instance's state from the store, discarding in-memory
    /// changes.
    pub(crate) fn refresh(&self, session: &mut Session, handle: &EntityHandle) -> CoreResult<()> {
        let access = self.context.access(handle)?;
        let key = access
            .identifier()?
            .ok_or_else(|| DatastoreError::backend("cannot refresh an unsaved instance"))?;
        let entry = self
            .store
            .retrieve_entry(&self.entity, &key)?
            .ok_or_else(|| {
                DatastoreError::backend(format!(
                    "no stored entry for {}#{key}",
                    self.entity.name()
                ))
            })?;
        session.set_baseline(self.entity.name(), key.clone(), entry.clone());
        self.apply_entry(session, &self.entity, &access, &key, &entry)
    }

    /// Entry snapshot used for dirty comparison: no cascades are triggered
    /// and unresolved collections are ignored.
    fn dirty_snapshot(&self, access: &EntityAccess) -> CoreResult<NativeEntry> {
        let mut entry = NativeEntry::new(self.entity.family());
        for prop in self.entity.properties() {
            let entry_key = prop.entry_key();
            match &prop.kind {
                PropertyKind::Simple | PropertyKind::Basic => {
                    entry.put(entry_key, access.get(&prop.name)?);
                }
                PropertyKind::Custom { marshaller } => {
                    entry.put(entry_key, marshaller.write(&access.get(&prop.name)?));
                }
                PropertyKind::Embedded { target } => {
                    if let Value::Entity(EntityRef::Loaded(embedded)) = access.get(&prop.name)? {
                        let sub = self.build_embedded(target, &embedded)?;
                        entry.put_entry(entry_key, sub);
                    }
                }
                PropertyKind::ToOne { .. } => match access.get(&prop.name)? {
                    Value::Id(id) | Value::Entity(EntityRef::Proxy { id, .. }) => {
                        entry.put(entry_key, Value::Id(id));
                    }
                    Value::Entity(EntityRef::Loaded(child)) => {
                        if let Some(id) = self.context.access(&child)?.identifier()? {
                            entry.put(entry_key, Value::Id(id));
                        }
                    }
                    _ => {}
                },
                PropertyKind::OneToMany { .. } => {}
            }
        }
        Ok(entry)
    }

    /// Compares the instance's current state against a cached entry.
    pub(crate) fn is_dirty_against(
        &self,
        access: &EntityAccess,
        baseline: &NativeEntry,
    ) -> CoreResult<bool> {
        let snapshot = self.dirty_snapshot(access)?;
        for prop in self.entity.properties() {
            if matches!(prop.kind, PropertyKind::OneToMany { .. }) {
                continue;
            }
            let entry_key = prop.entry_key();
            if snapshot.get(entry_key) != baseline.get(entry_key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn check_required(&self, prop: &PersistentProperty, value: &Value) -> CoreResult<()> {
        if prop.required && value.is_null() {
            return Err(self.required_violation(prop));
        }
        Ok(())
    }

    fn required_violation(&self, prop: &PersistentProperty) -> DatastoreError {
        DatastoreError::data_integrity(format!(
            "{}.{} is required but was null",
            self.entity.name(),
            prop.name
        ))
    }

    fn mismatch(&self, prop: &PersistentProperty, expected: &str, found: &Value) -> DatastoreError {
        ModelError::type_mismatch(
            self.entity.name(),
            &prop.name,
            format!("expected {expected}, found {}", found.type_name()),
        )
        .into()
    }

    fn cleanup_op(&self, old_entry: Option<NativeEntry>) -> KeyedOp {
        let entity = Arc::clone(&self.entity);
        let store = Arc::clone(&self.store);
        Box::new(move |session: &mut Session, key: &Identity| {
            session.evict(entity.name(), key);
            if store.requires_property_indexing() {
                if let Some(old) = &old_entry {
                    for prop in entity.properties().iter().filter(|p| p.indexed) {
                        if let Some(value) = old.get(prop.entry_key()) {
                            if let Some(indexer) = store.property_indexer(&entity, prop) {
                                indexer.deindex(value, key)?;
                            }
                        }
                    }
                }
            }
            Ok(())
        })
    }

    fn queue_delete(
        &self,
        session: &mut Session,
        key: Identity,
        handle: Option<EntityHandle>,
    ) -> CoreResult<()> {
        let old_entry = match session.baseline(self.entity.name(), &key) {
            Some(entry) => Some(entry),
            None => self.store.retrieve_entry(&self.entity, &key)?,
        };
        tracing::trace!(entity = self.entity.name(), key = %key, "queueing delete");
        let mut op = PendingOperation::delete(
            Arc::clone(&self.entity),
            key,
            handle,
            Arc::clone(&self.store),
        );
        op.set_on_complete(self.cleanup_op(old_entry));
        session.queue(op)
    }
}

impl Persister for NativeEntryPersister {
    fn entity(&self) -> &Arc<PersistentEntity> {
        &self.entity
    }

    fn persist(&self, session: &mut Session, handle: &EntityHandle) -> CoreResult<Identity> {
        let access = self.context.access(handle)?;
        let existing = access.identifier()?;
        let assigned = matches!(
            self.entity.identity().map(|i| i.generator),
            Some(IdGenerator::Assigned)
        );
        // An assigned key on an instance the session has never seen means a
        // first write, not an update.
        let is_update = existing.is_some() && (!assigned || session.contains(handle));
        match (is_update, existing) {
            (true, Some(key)) => self.update_instance(session, handle, &access, key),
            (_, existing) => self.insert_instance(session, handle, &access, existing),
        }
    }

    fn retrieve(&self, session: &mut Session, key: &Identity) -> CoreResult<Option<EntityHandle>> {
        if let Some(handle) = session.cached_instance(self.entity.name(), key) {
            return Ok(Some(handle));
        }
        let Some(entry) = self.store.retrieve_entry(&self.entity, key)? else {
            return Ok(None);
        };
        self.instantiate(session, key, &entry).map(Some)
    }

    fn retrieve_all(
        &self,
        session: &mut Session,
        keys: &[Identity],
    ) -> CoreResult<Vec<Option<EntityHandle>>> {
        let mut results: Vec<Option<EntityHandle>> = vec![None; keys.len()];
        let mut missing_keys = Vec::new();
        let mut missing_positions = Vec::new();
        for (position, key) in keys.iter().enumerate() {
            match session.cached_instance(self.entity.name(), key) {
                Some(handle) => results[position] = Some(handle),
                None => {
                    missing_keys.push(key.clone());
                    missing_positions.push(position);
                }
            }
        }
        let entries = self.store.retrieve_entries(&self.entity, &missing_keys)?;
        for ((position, key), entry) in missing_positions
            .into_iter()
            .zip(missing_keys.iter())
            .zip(entries)
        {
            if let Some(entry) = entry {
                results[position] = Some(self.instantiate(session, key, &entry)?);
            }
        }
        Ok(results)
    }

    fn delete(&self, session: &mut Session, handle: &EntityHandle) -> CoreResult<()> {
        let access = self.context.access(handle)?;
        let Some(key) = access.identifier()? else {
            return Ok(());
        };
        for prop in self.entity.properties() {
            match &prop.kind {
                PropertyKind::ToOne { target, cascade, .. } if cascade.delete => {
                    match access.get(&prop.name)? {
                        Value::Id(id) | Value::Entity(EntityRef::Proxy { id, .. }) => {
                            session.delete_key(target, &id)?;
                        }
                        Value::Entity(EntityRef::Loaded(child)) => {
                            session.delete(&child)?;
                        }
                        _ => {}
                    }
                }
                PropertyKind::OneToMany { target, cascade, .. } if cascade.delete => {
                    let child_keys = match access.get(&prop.name)? {
                        Value::List(items) => {
                            let mut keys = Vec::with_capacity(items.len());
                            for item in &items {
                                if let Some(child_key) =
                                    self.to_one_key(session, prop, target, false, item)?
                                {
                                    keys.push(child_key);
                                }
                            }
                            keys
                        }
                        Value::Collection(_) => self
                            .store
                            .association_indexer(&self.entity, prop)
                            .map(|indexer| indexer.query(&key))
                            .transpose()?
                            .unwrap_or_default(),
                        _ => Vec::new(),
                    };
                    for child_key in child_keys {
                        session.delete_key(target, &child_key)?;
                    }
                }
                _ => {}
            }
        }
        self.queue_delete(session, key, Some(handle.clone()))
    }

    fn delete_by_key(&self, session: &mut Session, key: &Identity) -> CoreResult<()> {
        self.queue_delete(session, key.clone(), None)
    }

    fn proxy(&self, key: Identity) -> EntityRef {
        EntityRef::Proxy {
            entity: self.entity.name().to_string(),
            id: key,
        }
    }
}

/// Completion work shared by inserts and updates: refresh the first-level
/// caches and apply the property-index deltas.
fn completion_op(
    entity: Arc<PersistentEntity>,
    store: Arc<dyn NativeEntryStore>,
    handle: EntityHandle,
    shared: SharedEntry,
    to_index: Vec<(String, Value)>,
    to_unindex: Vec<(String, Value)>,
) -> KeyedOp {
    Box::new(move |session: &mut Session, key: &Identity| {
        session.cache_instance(entity.name(), key.clone(), handle.clone());
        session.set_baseline(entity.name(), key.clone(), shared.snapshot());
        if store.requires_property_indexing() {
            for (prop_name, old_value) in &to_unindex {
                if let Some(prop) = entity.property(prop_name) {
                    if let Some(indexer) = store.property_indexer(&entity, prop) {
                        indexer.deindex(old_value, key)?;
                    }
                }
            }
            for (prop_name, value) in &to_index {
                if let Some(prop) = entity.property(prop_name) {
                    if let Some(indexer) = store.property_indexer(&entity, prop) {
                        indexer.index(value, key)?;
                    }
                }
            }
        }
        Ok(())
    })
}
