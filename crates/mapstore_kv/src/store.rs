//! The in-memory key-value store adapter.

use crate::indexing::{KvAssociationIndexer, KvIndices, KvPropertyIndexer};
use crate::locking::LockTable;
use mapstore_core::{
    AssociationIndexer, CoreResult, DatastoreError, LockableStore, NativeEntryStore,
    PropertyValueIndexer,
};
use mapstore_model::{Identity, NativeEntry, PersistentEntity, PersistentProperty, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// How the store produces identifiers for new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Random v4 UUID keys handed out ahead of the write, so inserts can be
    /// deferred to flush.
    #[default]
    Uuid,
    /// Per-family integer sequence assigned by the store at write time,
    /// forcing inserts to execute immediately.
    Sequence,
}

/// An in-memory key-value backend: one ordered map of entries per family,
/// manual property and association indices, and a per-entry lock table.
#[derive(Default)]
pub struct KvStore {
    strategy: KeyStrategy,
    families: RwLock<HashMap<String, BTreeMap<Identity, NativeEntry>>>,
    sequences: Mutex<HashMap<String, i64>>,
    indices: Arc<KvIndices>,
    locks: LockTable,
}

impl KvStore {
    /// Creates a store with UUID keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the identifier strategy.
    #[must_use]
    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Returns the number of entries stored for a family.
    #[must_use]
    pub fn entry_count(&self, family: &str) -> usize {
        self.families
            .read()
            .get(family)
            .map_or(0, BTreeMap::len)
    }

    /// Looks up the keys of entries whose indexed property holds the value.
    #[must_use]
    pub fn find_by_indexed(
        &self,
        entity: &PersistentEntity,
        property: &str,
        value: &Value,
    ) -> Vec<Identity> {
        self.indices
            .property_owners(entity.family(), property, value)
    }

    /// Returns the lock table, mostly for tests asserting lock state.
    #[must_use]
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    fn next_sequence(&self, family: &str) -> Identity {
        let mut sequences = self.sequences.lock();
        let next = sequences.entry(family.to_string()).or_insert(0);
        *next += 1;
        Identity::Int(*next)
    }
}

impl NativeEntryStore for KvStore {
    fn generate_identifier(&self, _entity: &PersistentEntity) -> Option<Identity> {
        match self.strategy {
            KeyStrategy::Uuid => Some(Identity::random()),
            KeyStrategy::Sequence => None,
        }
    }

    fn store_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
        entry: &NativeEntry,
    ) -> CoreResult<()> {
        tracing::trace!(family = entity.family(), key = %key, "kv store");
        self.families
            .write()
            .entry(entity.family().to_string())
            .or_default()
            .insert(key.clone(), entry.clone());
        Ok(())
    }

    fn store_entry_assigning_key(
        &self,
        entity: &PersistentEntity,
        entry: &NativeEntry,
    ) -> CoreResult<Identity> {
        if self.strategy != KeyStrategy::Sequence {
            return Err(DatastoreError::backend(
                "store-assigned keys require the sequence strategy",
            ));
        }
        let key = self.next_sequence(entity.family());
        self.store_entry(entity, &key, entry)?;
        Ok(key)
    }

    fn update_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
        entry: &NativeEntry,
    ) -> CoreResult<()> {
        let mut families = self.families.write();
        let family = families.entry(entity.family().to_string()).or_default();
        if !family.contains_key(key) {
            return Err(DatastoreError::backend(format!(
                "no entry to update under {}#{key}",
                entity.family()
            )));
        }
        family.insert(key.clone(), entry.clone());
        Ok(())
    }

    fn delete_entries(&self, entity: &PersistentEntity, keys: &[Identity]) -> CoreResult<()> {
        let mut families = self.families.write();
        if let Some(family) = families.get_mut(entity.family()) {
            for key in keys {
                family.remove(key);
            }
        }
        Ok(())
    }

    fn retrieve_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
    ) -> CoreResult<Option<NativeEntry>> {
        Ok(self
            .families
            .read()
            .get(entity.family())
            .and_then(|family| family.get(key))
            .cloned())
    }

    fn property_indexer(
        &self,
        entity: &PersistentEntity,
        property: &PersistentProperty,
    ) -> Option<Box<dyn PropertyValueIndexer>> {
        Some(Box::new(KvPropertyIndexer::new(
            Arc::clone(&self.indices),
            entity.family().to_string(),
            property.name.clone(),
        )))
    }

    fn association_indexer(
        &self,
        entity: &PersistentEntity,
        property: &PersistentProperty,
    ) -> Option<Box<dyn AssociationIndexer>> {
        Some(Box::new(KvAssociationIndexer::new(
            Arc::clone(&self.indices),
            entity.family().to_string(),
            property.name.clone(),
        )))
    }

    fn as_lockable(&self) -> Option<&dyn LockableStore> {
        Some(self)
    }
}

impl LockableStore for KvStore {
    fn lock_entry(&self, family: &str, key: &Identity, timeout: Duration) -> CoreResult<()> {
        self.locks.acquire(family, key, timeout)
    }

    fn unlock_entry(&self, family: &str, key: &Identity) {
        self.locks.release(family, key);
    }
}
