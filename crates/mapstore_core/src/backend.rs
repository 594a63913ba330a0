//! Backend adapter contracts.
//!
//! A backend adapter exposes its store as a [`NativeEntryStore`]: a sink and
//! source of whole native entries keyed by identity. The engine owns the
//! mapping between instances and entries; adapters own the physical layout,
//! identifier generation and (where the store cannot query values natively)
//! the manual index structures.

use crate::error::{CoreResult, DatastoreError};
use mapstore_model::{Identity, NativeEntry, PersistentEntity, PersistentProperty, Value};
use std::time::Duration;

/// The write/read contract between the mapping engine and a backing store.
pub trait NativeEntryStore: Send + Sync {
    /// Returns the store family used for the entity.
    fn family(&self, entity: &PersistentEntity) -> String {
        entity.family().to_string()
    }

    /// Creates an empty native entry for the entity's family.
    fn create_entry(&self, entity: &PersistentEntity) -> NativeEntry {
        NativeEntry::new(self.family(entity))
    }

    /// Produces an identifier for a new instance ahead of the write, or
    /// `None` when the store assigns identifiers itself at write time.
    fn generate_identifier(&self, entity: &PersistentEntity) -> Option<Identity>;

    /// Writes a new entry under the given key.
    fn store_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
        entry: &NativeEntry,
    ) -> CoreResult<()>;

    /// Writes a new entry, letting the store assign and return the key.
    ///
    /// Only meaningful for stores whose [`generate_identifier`] returns
    /// `None`.
    ///
    /// [`generate_identifier`]: NativeEntryStore::generate_identifier
    fn store_entry_assigning_key(
        &self,
        entity: &PersistentEntity,
        _entry: &NativeEntry,
    ) -> CoreResult<Identity> {
        Err(DatastoreError::backend(format!(
            "store-assigned identifiers are not supported for {}",
            entity.name()
        )))
    }

    /// Writes a batch of new entries.
    ///
    /// The default loops over [`store_entry`]; adapters with a native batch
    /// write override this and report it via [`supports_batch`].
    ///
    /// [`store_entry`]: NativeEntryStore::store_entry
    /// [`supports_batch`]: NativeEntryStore::supports_batch
    fn store_entries(
        &self,
        entity: &PersistentEntity,
        batch: &[(Identity, NativeEntry)],
    ) -> CoreResult<()> {
        for (key, entry) in batch {
            self.store_entry(entity, key, entry)?;
        }
        Ok(())
    }

    /// Returns true if [`store_entries`] is a native batch write.
    ///
    /// [`store_entries`]: NativeEntryStore::store_entries
    fn supports_batch(&self) -> bool {
        false
    }

    /// Overwrites the entry stored under the key.
    fn update_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
        entry: &NativeEntry,
    ) -> CoreResult<()>;

    /// Removes the entries stored under the given keys.
    fn delete_entries(&self, entity: &PersistentEntity, keys: &[Identity]) -> CoreResult<()>;

    /// Reads the entry stored under the key.
    fn retrieve_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
    ) -> CoreResult<Option<NativeEntry>>;

    /// Reads entries for a batch of keys, position-aligned with the input.
    fn retrieve_entries(
        &self,
        entity: &PersistentEntity,
        keys: &[Identity],
    ) -> CoreResult<Vec<Option<NativeEntry>>> {
        keys.iter()
            .map(|key| self.retrieve_entry(entity, key))
            .collect()
    }

    /// Returns true if the engine must maintain property-value indices
    /// manually. Stores that can query document fields natively return
    /// false.
    fn requires_property_indexing(&self) -> bool {
        true
    }

    /// Returns the manual index for an indexed property, if the store keeps
    /// one.
    fn property_indexer(
        &self,
        _entity: &PersistentEntity,
        _property: &PersistentProperty,
    ) -> Option<Box<dyn PropertyValueIndexer>> {
        None
    }

    /// Returns the association index for a to-many property.
    fn association_indexer(
        &self,
        entity: &PersistentEntity,
        property: &PersistentProperty,
    ) -> Option<Box<dyn AssociationIndexer>>;

    /// Returns the pessimistic-locking capability, if the store has one.
    fn as_lockable(&self) -> Option<&dyn LockableStore> {
        None
    }

    /// Called once after each successful flush.
    fn post_flush(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Maintains the keys of a to-many association for each owner.
pub trait AssociationIndexer: Send + Sync {
    /// Replaces the indexed child keys for the owner.
    fn index(&self, owner: &Identity, children: &[Identity]) -> CoreResult<()>;

    /// Returns the child keys indexed for the owner.
    fn query(&self, owner: &Identity) -> CoreResult<Vec<Identity>>;
}

/// Maintains a value-to-owners index for one property.
pub trait PropertyValueIndexer: Send + Sync {
    /// Adds the owner under the value.
    fn index(&self, value: &Value, owner: &Identity) -> CoreResult<()>;

    /// Removes the owner from under the value.
    fn deindex(&self, value: &Value, owner: &Identity) -> CoreResult<()>;

    /// Returns the owners indexed under the value.
    fn query(&self, value: &Value) -> CoreResult<Vec<Identity>>;
}

/// Pessimistic per-entry locking capability.
pub trait LockableStore: Send + Sync {
    /// Acquires an exclusive lock on the entry, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::CannotAcquireLock`] when the wait expires.
    fn lock_entry(&self, family: &str, key: &Identity, timeout: Duration) -> CoreResult<()>;

    /// Releases a lock previously acquired by this session.
    fn unlock_entry(&self, family: &str, key: &Identity);
}
