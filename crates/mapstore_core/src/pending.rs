//! Deferred write operations and their bounded queues.
//!
//! Writes requested through a session do not hit the backend immediately.
//! Each request becomes a [`PendingOperation`] queued per entity type and
//! executed at flush time in a fixed order: inserts, then updates, then
//! deletes. An operation carries pre-operations (run first, always), the
//! primary store action, completion work (cache and index maintenance) and
//! cascade operations (run after the primary succeeds).

use crate::backend::NativeEntryStore;
use crate::error::{CoreResult, DatastoreError};
use crate::session::Session;
use mapstore_model::{EntityHandle, Identity, PersistentEntity, SharedEntry};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// The kind of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// A first write of a new entry.
    Insert,
    /// An overwrite of an existing entry.
    Update,
    /// A removal of an existing entry.
    Delete,
}

impl OperationKind {
    /// Returns a lowercase label for error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Work run against the session, with no key context.
pub type SessionOp = Box<dyn FnOnce(&mut Session) -> CoreResult<()> + Send>;

/// Work run against the session once the owning operation's key is known.
pub type KeyedOp = Box<dyn FnOnce(&mut Session, &Identity) -> CoreResult<()> + Send>;

/// The store action a pending operation performs.
pub enum PrimaryAction {
    /// Write a new entry.
    Insert {
        /// Target store.
        store: Arc<dyn NativeEntryStore>,
    },
    /// Overwrite an entry, optionally checking the stored version first.
    Update {
        /// Target store.
        store: Arc<dyn NativeEntryStore>,
        /// Version the stored entry must still carry, when the entity is
        /// under optimistic locking.
        expected_version: Option<i64>,
    },
    /// Remove an entry.
    Delete {
        /// Target store.
        store: Arc<dyn NativeEntryStore>,
    },
}

impl fmt::Debug for PrimaryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert { .. } => f.write_str("Insert"),
            Self::Update {
                expected_version, ..
            } => write!(f, "Update(expected_version={expected_version:?})"),
            Self::Delete { .. } => f.write_str("Delete"),
        }
    }
}

/// One deferred write, queued at request time and executed at flush.
pub struct PendingOperation {
    kind: OperationKind,
    seq: u64,
    entity: Arc<PersistentEntity>,
    key: Option<Identity>,
    entry: Option<SharedEntry>,
    handle: Option<EntityHandle>,
    vetoed: bool,
    pre_operations: Vec<SessionOp>,
    cascade_operations: Vec<KeyedOp>,
    primary: PrimaryAction,
    on_complete: Option<KeyedOp>,
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("kind", &self.kind)
            .field("entity", &self.entity.name())
            .field("key", &self.key)
            .field("vetoed", &self.vetoed)
            .field("primary", &self.primary)
            .finish()
    }
}

impl PendingOperation {
    /// Creates a pending insert.
    #[must_use]
    pub fn insert(
        entity: Arc<PersistentEntity>,
        key: Identity,
        entry: SharedEntry,
        handle: EntityHandle,
        store: Arc<dyn NativeEntryStore>,
    ) -> Self {
        Self {
            kind: OperationKind::Insert,
            seq: 0,
            entity,
            key: Some(key),
            entry: Some(entry),
            handle: Some(handle),
            vetoed: false,
            pre_operations: Vec::new(),
            cascade_operations: Vec::new(),
            primary: PrimaryAction::Insert { store },
            on_complete: None,
        }
    }

    /// Creates a pending update.
    #[must_use]
    pub fn update(
        entity: Arc<PersistentEntity>,
        key: Identity,
        entry: SharedEntry,
        handle: EntityHandle,
        store: Arc<dyn NativeEntryStore>,
        expected_version: Option<i64>,
    ) -> Self {
        Self {
            kind: OperationKind::Update,
            seq: 0,
            entity,
            key: Some(key),
            entry: Some(entry),
            handle: Some(handle),
            vetoed: false,
            pre_operations: Vec::new(),
            cascade_operations: Vec::new(),
            primary: PrimaryAction::Update {
                store,
                expected_version,
            },
            on_complete: None,
        }
    }

    /// Creates a pending delete. The live handle is optional since deletes
    /// may cascade to instances never loaded into the session.
    #[must_use]
    pub fn delete(
        entity: Arc<PersistentEntity>,
        key: Identity,
        handle: Option<EntityHandle>,
        store: Arc<dyn NativeEntryStore>,
    ) -> Self {
        Self {
            kind: OperationKind::Delete,
            seq: 0,
            entity,
            key: Some(key),
            entry: None,
            handle,
            vetoed: false,
            pre_operations: Vec::new(),
            cascade_operations: Vec::new(),
            primary: PrimaryAction::Delete { store },
            on_complete: None,
        }
    }

    /// Adds work run before the primary action. Pre-operations always run,
    /// even when the primary is later vetoed.
    pub fn add_pre_operation(&mut self, op: SessionOp) {
        self.pre_operations.push(op);
    }

    /// Adds work run after the primary action succeeds.
    pub fn add_cascade_operation(&mut self, op: KeyedOp) {
        self.cascade_operations.push(op);
    }

    /// Sets the completion work run between the primary action and the
    /// cascades.
    pub fn set_on_complete(&mut self, op: KeyedOp) {
        self.on_complete = Some(op);
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Returns the owning entity descriptor.
    #[must_use]
    pub fn entity(&self) -> &Arc<PersistentEntity> {
        &self.entity
    }

    /// Returns the target key, if known before execution.
    #[must_use]
    pub fn key(&self) -> Option<&Identity> {
        self.key.as_ref()
    }

    /// Returns the shared entry being written, for insert and update.
    #[must_use]
    pub fn entry(&self) -> Option<&SharedEntry> {
        self.entry.as_ref()
    }

    /// Returns the live instance handle, when the operation has one.
    #[must_use]
    pub fn handle(&self) -> Option<&EntityHandle> {
        self.handle.as_ref()
    }

    /// Returns the queue sequence number assigned at push time.
    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns true if the primary action has been vetoed.
    #[must_use]
    pub fn is_vetoed(&self) -> bool {
        self.vetoed
    }

    /// Vetoes the primary action. Pre-operations still run; the store write
    /// and cascades are skipped.
    pub fn veto(&mut self) {
        self.vetoed = true;
    }

    /// Runs pre-operations and consults the session's write interceptors,
    /// recording a veto if any interceptor objects.
    pub(crate) fn run_pre(&mut self, session: &mut Session) -> CoreResult<()> {
        for pre in self.pre_operations.drain(..) {
            pre(session)?;
        }
        if !self.vetoed && session.interceptors_veto(self.kind, &self.entity, self.handle.as_ref())
        {
            tracing::debug!(
                entity = self.entity.name(),
                kind = self.kind.label(),
                "write vetoed by interceptor"
            );
            self.vetoed = true;
        }
        Ok(())
    }

    /// Executes the primary store action. Returns the written key, or `None`
    /// when the operation was vetoed.
    pub(crate) fn run_primary(&mut self) -> CoreResult<Option<Identity>> {
        if self.vetoed {
            return Ok(None);
        }
        let key = self
            .key
            .clone()
            .ok_or_else(|| DatastoreError::backend("pending operation has no key"))?;
        match &self.primary {
            PrimaryAction::Insert { store } => {
                let snapshot = self.snapshot()?;
                store.store_entry(&self.entity, &key, &snapshot)?;
            }
            PrimaryAction::Update {
                store,
                expected_version,
            } => {
                if let (Some(expected), Some(version_name)) =
                    (expected_version, self.entity.version_name())
                {
                    let stored = store.retrieve_entry(&self.entity, &key)?;
                    let stored_version =
                        stored.and_then(|e| e.get(version_name).and_then(|v| v.as_i64()));
                    if stored_version != Some(*expected) {
                        return Err(DatastoreError::optimistic_lock(
                            self.entity.name(),
                            key.clone(),
                        ));
                    }
                }
                let snapshot = self.snapshot()?;
                store.update_entry(&self.entity, &key, &snapshot)?;
            }
            PrimaryAction::Delete { store } => {
                store.delete_entries(&self.entity, std::slice::from_ref(&key))?;
            }
        }
        Ok(Some(key))
    }

    /// Runs completion work and cascades for the written key.
    pub(crate) fn complete(mut self, session: &mut Session, key: &Identity) -> CoreResult<()> {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(session, key)?;
        }
        for cascade in self.cascade_operations.drain(..) {
            cascade(session, key)?;
        }
        Ok(())
    }

    /// Runs the whole operation: pre-operations, interceptors, the primary
    /// action, completion and cascades.
    pub(crate) fn execute(mut self, session: &mut Session) -> CoreResult<()> {
        self.run_pre(session)?;
        match self.run_primary()? {
            Some(key) => self.complete(session, &key),
            None => Ok(()),
        }
    }

    /// Returns an owned snapshot of the operation's entry.
    pub(crate) fn snapshot(&self) -> CoreResult<mapstore_model::NativeEntry> {
        self.entry
            .as_ref()
            .map(SharedEntry::snapshot)
            .ok_or_else(|| DatastoreError::backend("pending operation has no entry"))
    }

    /// Returns the target store of the primary action.
    pub(crate) fn primary_store(&self) -> Arc<dyn NativeEntryStore> {
        match &self.primary {
            PrimaryAction::Insert { store }
            | PrimaryAction::Update { store, .. }
            | PrimaryAction::Delete { store } => Arc::clone(store),
        }
    }
}

/// The session's bounded pending queues, one vector per entity type per
/// operation kind.
#[derive(Debug, Default)]
pub struct PendingQueues {
    capacity: usize,
    next_seq: u64,
    inserts: BTreeMap<String, Vec<PendingOperation>>,
    updates: BTreeMap<String, Vec<PendingOperation>>,
    deletes: BTreeMap<String, Vec<PendingOperation>>,
}

/// Queued operations removed from a session for execution, grouped per
/// entity type in name order.
#[derive(Debug, Default)]
pub struct DrainedOperations {
    /// Pending inserts per entity.
    pub inserts: BTreeMap<String, Vec<PendingOperation>>,
    /// Pending updates per entity.
    pub updates: BTreeMap<String, Vec<PendingOperation>>,
    /// Pending deletes per entity.
    pub deletes: BTreeMap<String, Vec<PendingOperation>>,
}

impl DrainedOperations {
    /// Returns true if nothing was queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Flattens one kind's per-entity queues back into request order, so
    /// that operations queued by cascades (a child insert queued while
    /// building its owner's entry) execute before the operation that caused
    /// them.
    #[must_use]
    pub fn in_request_order(map: BTreeMap<String, Vec<PendingOperation>>) -> Vec<PendingOperation> {
        let mut ops: Vec<PendingOperation> = map.into_values().flatten().collect();
        ops.sort_by_key(|op| op.seq);
        ops
    }
}

impl PendingQueues {
    /// Creates queues with the given per-entity capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 0,
            inserts: BTreeMap::new(),
            updates: BTreeMap::new(),
            deletes: BTreeMap::new(),
        }
    }

    fn queue_for(&mut self, kind: OperationKind) -> &mut BTreeMap<String, Vec<PendingOperation>> {
        match kind {
            OperationKind::Insert => &mut self.inserts,
            OperationKind::Update => &mut self.updates,
            OperationKind::Delete => &mut self.deletes,
        }
    }

    /// Queues an operation, checking capacity first.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::CapacityExceeded`] when the entity's queue
    /// for this operation kind is already at capacity.
    pub fn push(&mut self, mut op: PendingOperation) -> CoreResult<()> {
        let capacity = self.capacity;
        let kind = op.kind();
        let entity = op.entity().name().to_string();
        op.seq = self.next_seq;
        self.next_seq += 1;
        let queue = self.queue_for(kind).entry(entity.clone()).or_default();
        if queue.len() >= capacity {
            return Err(DatastoreError::capacity_exceeded(
                entity,
                kind.label(),
                capacity,
            ));
        }
        queue.push(op);
        Ok(())
    }

    /// Returns the number of queued operations for an entity and kind.
    #[must_use]
    pub fn count(&self, kind: OperationKind, entity: &str) -> usize {
        let queue = match kind {
            OperationKind::Insert => &self.inserts,
            OperationKind::Update => &self.updates,
            OperationKind::Delete => &self.deletes,
        };
        queue.get(entity).map_or(0, Vec::len)
    }

    /// Returns the total number of queued operations.
    #[must_use]
    pub fn total(&self) -> usize {
        [&self.inserts, &self.updates, &self.deletes]
            .into_iter()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Removes and returns all queued operations.
    pub fn drain(&mut self) -> DrainedOperations {
        DrainedOperations {
            inserts: std::mem::take(&mut self.inserts),
            updates: std::mem::take(&mut self.updates),
            deletes: std::mem::take(&mut self.deletes),
        }
    }

    /// Discards all queued operations.
    pub fn clear(&mut self) {
        self.inserts.clear();
        self.updates.clear();
        self.deletes.clear();
    }
}
