//! The unit-of-work session.
//!
//! A session fronts one backend store: it caches loaded instances (the
//! identity map), queues writes as pending operations, and executes them at
//! flush in a fixed order (inserts, updates, deletes, post-flush work). A
//! flush error latches the session; it refuses further work until
//! [`Session::clear`] resets it.

use crate::backend::NativeEntryStore;
use crate::config::SessionConfig;
use crate::error::{CoreResult, DatastoreError};
use crate::pending::{
    DrainedOperations, OperationKind, PendingOperation, PendingQueues, SessionOp,
};
use crate::persister::{NativeEntryPersister, Persister};
use crate::transaction::{SessionTransaction, TransactionStatus};
use mapstore_model::{
    AssociationRef, EntityHandle, EntityRef, Identity, MappingContext, NativeEntry,
    PersistentEntity, PropertyKind, Value,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The outcome of consulting a write interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    /// Let the write proceed.
    Proceed,
    /// Skip the write. Vetoed operations are not errors; their store action
    /// and cascades simply do not run.
    Veto,
}

/// Consulted before each primary write executes.
pub trait WriteInterceptor: Send + Sync {
    /// Decides whether the write may proceed. `handle` is absent for
    /// deletes cascaded to instances that were never loaded.
    fn before_write(
        &self,
        kind: OperationKind,
        entity: &PersistentEntity,
        handle: Option<&EntityHandle>,
    ) -> Interception;
}

/// A unit of work over one backend store.
pub struct Session {
    context: Arc<MappingContext>,
    store: Arc<dyn NativeEntryStore>,
    config: SessionConfig,
    persisters: HashMap<String, Arc<NativeEntryPersister>>,
    instance_cache: HashMap<(String, Identity), EntityHandle>,
    baselines: HashMap<(String, Identity), NativeEntry>,
    attributes: HashMap<(usize, String), Value>,
    queues: PendingQueues,
    post_flush_ops: Vec<SessionOp>,
    interceptors: Vec<Arc<dyn WriteInterceptor>>,
    exception_occurred: bool,
    transaction: Option<SessionTransaction>,
}

impl Session {
    /// Opens a session over the given context and store.
    #[must_use]
    pub fn new(
        context: Arc<MappingContext>,
        store: Arc<dyn NativeEntryStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            context,
            store,
            config,
            persisters: HashMap::new(),
            instance_cache: HashMap::new(),
            baselines: HashMap::new(),
            attributes: HashMap::new(),
            queues: PendingQueues::new(config.queue_capacity),
            post_flush_ops: Vec::new(),
            interceptors: Vec::new(),
            exception_occurred: false,
            transaction: None,
        }
    }

    /// Returns the mapping context.
    #[must_use]
    pub fn mapping_context(&self) -> &Arc<MappingContext> {
        &self.context
    }

    /// Returns the backend store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn NativeEntryStore> {
        &self.store
    }

    /// Returns true if the session skips first-level caching and dirty
    /// checking.
    #[must_use]
    pub fn is_stateless(&self) -> bool {
        self.config.stateless
    }

    /// Returns true if a previous flush failed and the session has not been
    /// cleared since.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.exception_occurred
    }

    fn check_usable(&self) -> CoreResult<()> {
        if self.exception_occurred {
            return Err(DatastoreError::SessionUnusable);
        }
        Ok(())
    }

    fn persister_for(&mut self, name: &str) -> CoreResult<Arc<NativeEntryPersister>> {
        if let Some(persister) = self.persisters.get(name) {
            return Ok(Arc::clone(persister));
        }
        let entity = self
            .context
            .entity(name)
            .map_err(|_| DatastoreError::not_persistent_type(name))?;
        if entity.is_embeddable() {
            return Err(DatastoreError::not_persistent_type(name));
        }
        let persister = Arc::new(NativeEntryPersister::new(
            entity,
            Arc::clone(&self.context),
            Arc::clone(&self.store),
        ));
        self.persisters.insert(name.to_string(), Arc::clone(&persister));
        Ok(persister)
    }

    fn normalize_key(entity: &PersistentEntity, key: &Identity) -> CoreResult<Identity> {
        match entity.identity() {
            Some(identity) if key.kind() != identity.kind => {
                Ok(key.convert_to(identity.kind)?)
            }
            _ => Ok(key.clone()),
        }
    }

    /// Queues a write for the instance and returns its key. New instances
    /// are queued as inserts, instances already seen by the session as
    /// updates; an unchanged cached instance is a no-op.
    pub fn persist(&mut self, handle: &EntityHandle) -> CoreResult<Identity> {
        self.check_usable()?;
        let persister = self.persister_for(handle.entity_name())?;
        persister.persist(self, handle)
    }

    /// Queues writes for a batch of instances.
    pub fn persist_all(&mut self, handles: &[EntityHandle]) -> CoreResult<Vec<Identity>> {
        handles.iter().map(|handle| self.persist(handle)).collect()
    }

    /// Persists an association-shaped value: a loaded instance is persisted,
    /// a proxy already names a stored instance.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::CannotPersistNull`] for `Value::Null` and
    /// [`DatastoreError::NotPersistentType`] for non-entity values.
    pub fn persist_value(&mut self, value: &Value) -> CoreResult<Identity> {
        match value {
            Value::Null => Err(DatastoreError::CannotPersistNull),
            Value::Entity(EntityRef::Loaded(handle)) => self.persist(&handle.clone()),
            Value::Entity(EntityRef::Proxy { id, .. }) => Ok(id.clone()),
            other => Err(DatastoreError::not_persistent_type(other.type_name())),
        }
    }

    /// Loads the instance of `entity` stored under the key. Keys of the
    /// wrong shape are converted to the entity's identity kind first.
    pub fn retrieve(&mut self, entity: &str, key: &Identity) -> CoreResult<Option<EntityHandle>> {
        self.check_usable()?;
        let persister = self.persister_for(entity)?;
        let key = Self::normalize_key(persister.entity(), key)?;
        persister.retrieve(self, &key)
    }

    /// Loads a batch of instances, position-aligned with the input keys.
    pub fn retrieve_all(
        &mut self,
        entity: &str,
        keys: &[Identity],
    ) -> CoreResult<Vec<Option<EntityHandle>>> {
        self.check_usable()?;
        let persister = self.persister_for(entity)?;
        let keys = keys
            .iter()
            .map(|key| Self::normalize_key(persister.entity(), key))
            .collect::<CoreResult<Vec<_>>>()?;
        persister.retrieve_all(self, &keys)
    }

    /// Queues removal of the instance, cascading to delete-cascaded
    /// associations.
    pub fn delete(&mut self, handle: &EntityHandle) -> CoreResult<()> {
        self.check_usable()?;
        let persister = self.persister_for(handle.entity_name())?;
        persister.delete(self, handle)
    }

    /// Queues removal of a batch of instances.
    pub fn delete_all(&mut self, handles: &[EntityHandle]) -> CoreResult<()> {
        for handle in handles {
            self.delete(handle)?;
        }
        Ok(())
    }

    /// Queues removal of the instance stored under a key, without loading
    /// it.
    pub fn delete_key(&mut self, entity: &str, key: &Identity) -> CoreResult<()> {
        self.check_usable()?;
        let persister = self.persister_for(entity)?;
        let key = Self::normalize_key(persister.entity(), key)?;
        persister.delete_by_key(self, &key)
    }

    /// Returns an unresolved reference to the instance stored under the key.
    pub fn proxy(&mut self, entity: &str, key: &Identity) -> CoreResult<EntityRef> {
        let persister = self.persister_for(entity)?;
        let key = Self::normalize_key(persister.entity(), key)?;
        Ok(persister.proxy(key))
    }

    /// Resolves a lazy to-many collection through the store's association
    /// index, returning the loaded children.
    pub fn resolve_collection(
        &mut self,
        reference: &AssociationRef,
    ) -> CoreResult<Vec<EntityHandle>> {
        let persister = self.persister_for(&reference.owner_entity)?;
        let entity = Arc::clone(persister.entity());
        let prop = entity.property(&reference.property).ok_or_else(|| {
            DatastoreError::from(mapstore_model::ModelError::property_not_found(
                entity.name(),
                &reference.property,
            ))
        })?;
        let PropertyKind::OneToMany { target, .. } = &prop.kind else {
            return Err(DatastoreError::backend(format!(
                "{}.{} is not a to-many association",
                entity.name(),
                reference.property
            )));
        };
        let target = target.clone();
        let child_keys = self
            .store
            .association_indexer(&entity, prop)
            .map(|indexer| indexer.query(&reference.owner_key))
            .transpose()?
            .unwrap_or_default();
        let children = self.retrieve_all(&target, &child_keys)?;
        Ok(children.into_iter().flatten().collect())
    }

    /// Returns true if the instance is tracked by the session's identity
    /// map.
    #[must_use]
    pub fn contains(&self, handle: &EntityHandle) -> bool {
        self.instance_cache
            .values()
            .any(|cached| cached.same_instance(handle))
    }

    /// Returns true if an instance of `entity` is cached under the key.
    #[must_use]
    pub fn is_cached(&self, entity: &str, key: &Identity) -> bool {
        self.instance_cache
            .contains_key(&(entity.to_string(), key.clone()))
    }

    /// Attaches a detached instance to the session's identity map.
    ///
    /// # Errors
    ///
    /// Fails for instances with no identifier.
    pub fn attach(&mut self, handle: &EntityHandle) -> CoreResult<()> {
        let access = self.context.access(handle)?;
        let key = access.identifier()?.ok_or_else(|| {
            DatastoreError::data_integrity(format!(
                "cannot attach an unsaved instance of {}",
                handle.entity_name()
            ))
        })?;
        self.cache_instance(handle.entity_name(), key, handle.clone());
        Ok(())
    }

    /// Detaches one instance from the session, dropping its cached state.
    pub fn clear_instance(&mut self, handle: &EntityHandle) {
        let keys: Vec<(String, Identity)> = self
            .instance_cache
            .iter()
            .filter(|(_, cached)| cached.same_instance(handle))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.instance_cache.remove(&key);
            self.baselines.remove(&key);
        }
        let token = handle.instance_token();
        self.attributes.retain(|(owner, _), _| *owner != token);
    }

    /// Resets the session: caches, pending queues, attributes and the error
    /// latch.
    pub fn clear(&mut self) {
        tracing::debug!("clearing session");
        self.instance_cache.clear();
        self.baselines.clear();
        self.attributes.clear();
        self.queues.clear();
        self.post_flush_ops.clear();
        self.exception_occurred = false;
    }

    /// Returns true if the instance's state differs from the entry cached
    /// when it was loaded or last flushed. Instances the session has no
    /// baseline for count as dirty.
    pub fn is_dirty(&mut self, handle: &EntityHandle) -> CoreResult<bool> {
        let persister = self.persister_for(handle.entity_name())?;
        let access = self.context.access(handle)?;
        let Some(key) = access.identifier()? else {
            return Ok(true);
        };
        match self.baseline(handle.entity_name(), &key) {
            Some(baseline) => persister.is_dirty_against(&access, &baseline),
            None => Ok(true),
        }
    }

    /// Re-reads the instance's state from the store, discarding in-memory
    /// changes.
    pub fn refresh(&mut self, handle: &EntityHandle) -> CoreResult<()> {
        self.check_usable()?;
        let persister = self.persister_for(handle.entity_name())?;
        persister.refresh(self, handle)
    }

    /// Pessimistically locks the instance's entry with the configured
    /// timeout.
    pub fn lock(&mut self, handle: &EntityHandle) -> CoreResult<()> {
        self.lock_with_timeout(handle, self.config.lock_timeout)
    }

    /// Pessimistically locks the instance's entry, waiting up to `timeout`.
    pub fn lock_with_timeout(
        &mut self,
        handle: &EntityHandle,
        timeout: Duration,
    ) -> CoreResult<()> {
        let persister = self.persister_for(handle.entity_name())?;
        let entity = Arc::clone(persister.entity());
        let access = self.context.access(handle)?;
        let key = access.identifier()?.ok_or_else(|| {
            DatastoreError::data_integrity(format!(
                "cannot lock an unsaved instance of {}",
                entity.name()
            ))
        })?;
        let lockable = self.store.as_lockable().ok_or_else(|| {
            DatastoreError::backend("the backend has no pessimistic locking capability")
        })?;
        lockable.lock_entry(&self.store.family(&entity), &key, timeout)
    }

    /// Releases a lock taken with [`Session::lock`].
    pub fn unlock(&mut self, handle: &EntityHandle) -> CoreResult<()> {
        let persister = self.persister_for(handle.entity_name())?;
        let entity = Arc::clone(persister.entity());
        let access = self.context.access(handle)?;
        if let (Some(key), Some(lockable)) = (access.identifier()?, self.store.as_lockable()) {
            lockable.unlock_entry(&self.store.family(&entity), &key);
        }
        Ok(())
    }

    /// Stores an instance-scoped attribute.
    pub fn set_attribute(&mut self, handle: &EntityHandle, name: impl Into<String>, value: Value) {
        self.attributes
            .insert((handle.instance_token(), name.into()), value);
    }

    /// Reads an instance-scoped attribute.
    #[must_use]
    pub fn get_attribute(&self, handle: &EntityHandle, name: &str) -> Option<&Value> {
        self.attributes
            .get(&(handle.instance_token(), name.to_string()))
    }

    /// Registers a write interceptor consulted before every primary write.
    pub fn add_interceptor(&mut self, interceptor: Arc<dyn WriteInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Adds work run after the pending queues have executed, before the
    /// store's post-flush hook.
    pub fn add_post_flush_operation(&mut self, op: SessionOp) {
        self.post_flush_ops.push(op);
    }

    /// Begins a transaction, or returns the one already outstanding.
    pub fn begin_transaction(&mut self) -> SessionTransaction {
        if let Some(tx) = &self.transaction {
            if tx.is_active() {
                return tx.clone();
            }
        }
        let tx = SessionTransaction::begin();
        self.transaction = Some(tx.clone());
        tx
    }

    /// Flushes the session and commits the outstanding transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::NoTransaction`] with no active transaction;
    /// flush errors propagate and leave the transaction active.
    pub fn commit_transaction(&mut self) -> CoreResult<()> {
        let tx = self
            .transaction
            .clone()
            .filter(SessionTransaction::is_active)
            .ok_or(DatastoreError::NoTransaction)?;
        self.flush()?;
        tx.mark(TransactionStatus::Committed);
        self.transaction = None;
        Ok(())
    }

    /// Discards all pending work and rolls the outstanding transaction back.
    pub fn rollback_transaction(&mut self) -> CoreResult<()> {
        let tx = self
            .transaction
            .clone()
            .filter(SessionTransaction::is_active)
            .ok_or(DatastoreError::NoTransaction)?;
        self.queues.clear();
        self.post_flush_ops.clear();
        tx.mark(TransactionStatus::RolledBack);
        self.transaction = None;
        Ok(())
    }

    /// Returns the number of operations queued for an entity and kind.
    #[must_use]
    pub fn pending_count(&self, kind: OperationKind, entity: &str) -> usize {
        self.queues.count(kind, entity)
    }

    /// Returns the total number of queued operations.
    #[must_use]
    pub fn pending_total(&self) -> usize {
        self.queues.total()
    }

    /// Executes all pending operations: inserts first, then updates, then
    /// deletes, then post-flush work, then the store's post-flush hook.
    ///
    /// # Errors
    ///
    /// Any error latches the session; further operations fail with
    /// [`DatastoreError::SessionUnusable`] until [`Session::clear`].
    pub fn flush(&mut self) -> CoreResult<()> {
        self.check_usable()?;
        if self.queues.is_empty() && self.post_flush_ops.is_empty() {
            return Ok(());
        }
        let result = self.flush_inner();
        if result.is_err() {
            self.exception_occurred = true;
        }
        result
    }

    fn flush_inner(&mut self) -> CoreResult<()> {
        tracing::debug!(pending = %self.pending_total(), "flushing session");
        let drained = self.queues.drain();

        if self.store.supports_batch() {
            self.flush_inserts_batched(drained.inserts)?;
        } else {
            for op in DrainedOperations::in_request_order(drained.inserts) {
                op.execute(self)?;
            }
        }
        for op in DrainedOperations::in_request_order(drained.updates) {
            op.execute(self)?;
        }
        for op in DrainedOperations::in_request_order(drained.deletes) {
            op.execute(self)?;
        }

        let post_flush = std::mem::take(&mut self.post_flush_ops);
        for op in post_flush {
            op(self)?;
        }
        self.store.post_flush()
    }

    /// Insert path for stores with a native batch write: one store call per
    /// entity group.
    fn flush_inserts_batched(
        &mut self,
        inserts: std::collections::BTreeMap<String, Vec<PendingOperation>>,
    ) -> CoreResult<()> {
        let mut groups: Vec<Vec<PendingOperation>> = inserts.into_values().collect();
        groups.sort_by_key(|ops| ops.first().map_or(u64::MAX, PendingOperation::seq));

        for mut ops in groups {
            for op in &mut ops {
                op.run_pre(self)?;
            }
            let mut batch = Vec::new();
            for op in ops.iter().filter(|op| !op.is_vetoed()) {
                let key = op
                    .key()
                    .cloned()
                    .ok_or_else(|| DatastoreError::backend("pending insert has no key"))?;
                batch.push((key, op.snapshot()?));
            }
            if let Some(first) = ops.iter().find(|op| !op.is_vetoed()) {
                let store = first.primary_store();
                let entity = Arc::clone(first.entity());
                tracing::trace!(entity = entity.name(), count = batch.len(), "batch insert");
                store.store_entries(&entity, &batch)?;
            }
            for op in ops {
                if op.is_vetoed() {
                    continue;
                }
                let key = op
                    .key()
                    .cloned()
                    .ok_or_else(|| DatastoreError::backend("pending insert has no key"))?;
                op.complete(self, &key)?;
            }
        }
        Ok(())
    }

    // Internal surface used by persisters and pending operations.

    pub(crate) fn queue(&mut self, op: PendingOperation) -> CoreResult<()> {
        self.queues.push(op)
    }

    pub(crate) fn interceptors_veto(
        &self,
        kind: OperationKind,
        entity: &PersistentEntity,
        handle: Option<&EntityHandle>,
    ) -> bool {
        self.interceptors
            .iter()
            .any(|i| i.before_write(kind, entity, handle) == Interception::Veto)
    }

    pub(crate) fn cached_instance(&self, entity: &str, key: &Identity) -> Option<EntityHandle> {
        self.instance_cache
            .get(&(entity.to_string(), key.clone()))
            .cloned()
    }

    pub(crate) fn cache_instance(&mut self, entity: &str, key: Identity, handle: EntityHandle) {
        if self.config.stateless {
            return;
        }
        self.instance_cache.insert((entity.to_string(), key), handle);
    }

    pub(crate) fn baseline(&self, entity: &str, key: &Identity) -> Option<NativeEntry> {
        self.baselines.get(&(entity.to_string(), key.clone())).cloned()
    }

    pub(crate) fn set_baseline(&mut self, entity: &str, key: Identity, entry: NativeEntry) {
        if self.config.stateless {
            return;
        }
        self.baselines.insert((entity.to_string(), key), entry);
    }

    pub(crate) fn evict(&mut self, entity: &str, key: &Identity) {
        let cache_key = (entity.to_string(), key.clone());
        self.instance_cache.remove(&cache_key);
        self.baselines.remove(&cache_key);
    }
}
