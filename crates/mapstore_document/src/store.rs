//! The in-memory document store adapter.

use crate::convert::{document_to_entry, entry_to_document, id_token, value_to_json};
use mapstore_core::{AssociationIndexer, CoreResult, DatastoreError, NativeEntryStore};
use mapstore_model::{
    IdentityKind, Identity, NativeEntry, PersistentEntity, PersistentProperty, Value,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

type AssociationKey = (String, String, Identity);

#[derive(Debug, Default)]
struct AssociationState {
    links: Mutex<HashMap<AssociationKey, Vec<Identity>>>,
}

/// An in-memory document backend: one collection of JSON documents per
/// family. The store can match document fields natively, so the engine
/// maintains no property indices for it, and batch inserts land in one
/// call.
#[derive(Default)]
pub struct DocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Json>>>,
    sequences: Mutex<HashMap<String, i64>>,
    associations: Arc<AssociationState>,
}

impl DocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of documents in a collection.
    #[must_use]
    pub fn document_count(&self, family: &str) -> usize {
        self.collections
            .read()
            .get(family)
            .map_or(0, BTreeMap::len)
    }

    /// Finds the keys of documents whose field equals the given value, the
    /// native query path that replaces manual property indexing.
    pub fn find_by_field(
        &self,
        entity: &PersistentEntity,
        field: &str,
        value: &Value,
    ) -> CoreResult<Vec<Identity>> {
        let needle = value_to_json(value)?;
        let collections = self.collections.read();
        let Some(collection) = collections.get(entity.family()) else {
            return Ok(Vec::new());
        };
        let mut keys = Vec::new();
        for (token, document) in collection {
            if document.get(field) == Some(&needle) {
                keys.push(crate::convert::parse_id_token(token)?);
            }
        }
        Ok(keys)
    }

    fn next_sequence(&self, family: &str) -> Identity {
        let mut sequences = self.sequences.lock();
        let next = sequences.entry(family.to_string()).or_insert(0);
        *next += 1;
        Identity::Int(*next)
    }
}

impl NativeEntryStore for DocumentStore {
    fn generate_identifier(&self, entity: &PersistentEntity) -> Option<Identity> {
        match entity.identity().map(|i| i.kind) {
            Some(IdentityKind::Uuid) => Some(Identity::random()),
            Some(IdentityKind::Text) => Some(Identity::Text(Uuid::new_v4().to_string())),
            // Integer keys come from a per-collection sequence at write time.
            Some(IdentityKind::Int) | None => None,
        }
    }

    fn store_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
        entry: &NativeEntry,
    ) -> CoreResult<()> {
        let document = entry_to_document(entry)?;
        tracing::trace!(collection = entity.family(), key = %key, "document store");
        self.collections
            .write()
            .entry(entity.family().to_string())
            .or_default()
            .insert(id_token(key), document);
        Ok(())
    }

    fn store_entry_assigning_key(
        &self,
        entity: &PersistentEntity,
        entry: &NativeEntry,
    ) -> CoreResult<Identity> {
        let key = self.next_sequence(entity.family());
        self.store_entry(entity, &key, entry)?;
        Ok(key)
    }

    fn store_entries(
        &self,
        entity: &PersistentEntity,
        batch: &[(Identity, NativeEntry)],
    ) -> CoreResult<()> {
        let documents = batch
            .iter()
            .map(|(key, entry)| Ok((id_token(key), entry_to_document(entry)?)))
            .collect::<CoreResult<Vec<_>>>()?;
        tracing::trace!(
            collection = entity.family(),
            count = documents.len(),
            "document batch store"
        );
        let mut collections = self.collections.write();
        let collection = collections.entry(entity.family().to_string()).or_default();
        for (token, document) in documents {
            collection.insert(token, document);
        }
        Ok(())
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn update_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
        entry: &NativeEntry,
    ) -> CoreResult<()> {
        let document = entry_to_document(entry)?;
        let mut collections = self.collections.write();
        let collection = collections.entry(entity.family().to_string()).or_default();
        let token = id_token(key);
        if !collection.contains_key(&token) {
            return Err(DatastoreError::backend(format!(
                "no document to update under {}#{key}",
                entity.family()
            )));
        }
        collection.insert(token, document);
        Ok(())
    }

    fn delete_entries(&self, entity: &PersistentEntity, keys: &[Identity]) -> CoreResult<()> {
        let mut collections = self.collections.write();
        if let Some(collection) = collections.get_mut(entity.family()) {
            for key in keys {
                collection.remove(&id_token(key));
            }
        }
        Ok(())
    }

    fn retrieve_entry(
        &self,
        entity: &PersistentEntity,
        key: &Identity,
    ) -> CoreResult<Option<NativeEntry>> {
        let collections = self.collections.read();
        let Some(document) = collections
            .get(entity.family())
            .and_then(|collection| collection.get(&id_token(key)))
        else {
            return Ok(None);
        };
        document_to_entry(entity.family(), document).map(Some)
    }

    fn requires_property_indexing(&self) -> bool {
        false
    }

    fn association_indexer(
        &self,
        entity: &PersistentEntity,
        property: &PersistentProperty,
    ) -> Option<Box<dyn AssociationIndexer>> {
        Some(Box::new(DocumentAssociationIndexer {
            state: Arc::clone(&self.associations),
            family: entity.family().to_string(),
            property: property.name.clone(),
        }))
    }
}

/// Association links kept beside the collections, per family and property.
struct DocumentAssociationIndexer {
    state: Arc<AssociationState>,
    family: String,
    property: String,
}

impl DocumentAssociationIndexer {
    fn key(&self, owner: &Identity) -> AssociationKey {
        (self.family.clone(), self.property.clone(), owner.clone())
    }
}

impl AssociationIndexer for DocumentAssociationIndexer {
    fn index(&self, owner: &Identity, children: &[Identity]) -> CoreResult<()> {
        self.state
            .links
            .lock()
            .insert(self.key(owner), children.to_vec());
        Ok(())
    }

    fn query(&self, owner: &Identity) -> CoreResult<Vec<Identity>> {
        Ok(self
            .state
            .links
            .lock()
            .get(&self.key(owner))
            .cloned()
            .unwrap_or_default())
    }
}
