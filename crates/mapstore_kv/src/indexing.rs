//! Manual index structures.
//!
//! A key-value store cannot query entry values, so the engine maintains
//! these indices through the [`PropertyValueIndexer`] and
//! [`AssociationIndexer`] contracts: one maps property values to owner keys,
//! the other maps an owner to the keys of its to-many children.

use mapstore_core::{AssociationIndexer, CoreResult, PropertyValueIndexer};
use mapstore_model::{Identity, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Canonical token for a value in the property index. Prefixed by variant
/// so that `Int(1)` and `Text("1")` never collide.
#[must_use]
pub fn index_token(value: &Value) -> String {
    match value {
        Value::Null => "n:".to_string(),
        Value::Bool(b) => format!("b:{b}"),
        Value::Int(i) => format!("i:{i}"),
        Value::Float(f) => format!("f:{f}"),
        Value::Text(s) => format!("t:{s}"),
        Value::Bytes(b) => {
            let mut token = String::with_capacity(2 + b.len() * 2);
            token.push_str("x:");
            for byte in b {
                token.push_str(&format!("{byte:02x}"));
            }
            token
        }
        Value::Id(id) => format!("k:{id}"),
        Value::List(items) => {
            let inner: Vec<String> = items.iter().map(index_token).collect();
            format!("l:[{}]", inner.join(","))
        }
        Value::Map(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}={}", index_token(v)))
                .collect();
            format!("m:{{{}}}", inner.join(","))
        }
        Value::Entity(_) | Value::Collection(_) => "e:".to_string(),
    }
}

type PropertyKey = (String, String, String);
type AssociationKey = (String, String, Identity);

/// The shared index state of one [`KvStore`](crate::KvStore).
#[derive(Debug, Default)]
pub struct KvIndices {
    property: Mutex<HashMap<PropertyKey, Vec<Identity>>>,
    association: Mutex<HashMap<AssociationKey, Vec<Identity>>>,
}

impl KvIndices {
    pub(crate) fn property_owners(&self, family: &str, property: &str, value: &Value) -> Vec<Identity> {
        self.property
            .lock()
            .get(&(family.to_string(), property.to_string(), index_token(value)))
            .cloned()
            .unwrap_or_default()
    }
}

/// Property-value index over the shared state, scoped to one family and
/// property.
pub struct KvPropertyIndexer {
    indices: Arc<KvIndices>,
    family: String,
    property: String,
}

impl KvPropertyIndexer {
    pub(crate) fn new(indices: Arc<KvIndices>, family: String, property: String) -> Self {
        Self {
            indices,
            family,
            property,
        }
    }

    fn key(&self, value: &Value) -> PropertyKey {
        (
            self.family.clone(),
            self.property.clone(),
            index_token(value),
        )
    }
}

impl PropertyValueIndexer for KvPropertyIndexer {
    fn index(&self, value: &Value, owner: &Identity) -> CoreResult<()> {
        let mut map = self.indices.property.lock();
        let owners = map.entry(self.key(value)).or_default();
        if !owners.contains(owner) {
            owners.push(owner.clone());
        }
        Ok(())
    }

    fn deindex(&self, value: &Value, owner: &Identity) -> CoreResult<()> {
        let mut map = self.indices.property.lock();
        if let Some(owners) = map.get_mut(&self.key(value)) {
            owners.retain(|existing| existing != owner);
        }
        Ok(())
    }

    fn query(&self, value: &Value) -> CoreResult<Vec<Identity>> {
        Ok(self
            .indices
            .property
            .lock()
            .get(&self.key(value))
            .cloned()
            .unwrap_or_default())
    }
}

/// Association index over the shared state, scoped to one family and
/// to-many property.
pub struct KvAssociationIndexer {
    indices: Arc<KvIndices>,
    family: String,
    property: String,
}

impl KvAssociationIndexer {
    pub(crate) fn new(indices: Arc<KvIndices>, family: String, property: String) -> Self {
        Self {
            indices,
            family,
            property,
        }
    }

    fn key(&self, owner: &Identity) -> AssociationKey {
        (self.family.clone(), self.property.clone(), owner.clone())
    }
}

impl AssociationIndexer for KvAssociationIndexer {
    fn index(&self, owner: &Identity, children: &[Identity]) -> CoreResult<()> {
        self.indices
            .association
            .lock()
            .insert(self.key(owner), children.to_vec());
        Ok(())
    }

    fn query(&self, owner: &Identity) -> CoreResult<Vec<Identity>> {
        Ok(self
            .indices
            .association
            .lock()
            .get(&self.key(owner))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_distinguish_variants() {
        assert_ne!(
            index_token(&Value::Int(1)),
            index_token(&Value::Text("1".into()))
        );
        assert_ne!(index_token(&Value::Null), index_token(&Value::Text(String::new())));
    }

    #[test]
    fn property_index_roundtrip() {
        let indexer = KvPropertyIndexer::new(
            Arc::new(KvIndices::default()),
            "people".into(),
            "name".into(),
        );
        let owner = Identity::Int(1);
        let value = Value::Text("Ada".into());
        indexer.index(&value, &owner).unwrap();
        indexer.index(&value, &owner).unwrap();
        assert_eq!(indexer.query(&value).unwrap(), vec![owner.clone()]);
        indexer.deindex(&value, &owner).unwrap();
        assert!(indexer.query(&value).unwrap().is_empty());
    }

    mod properties {
        use super::*;
        use mapstore_testkit::{arb_identity, arb_value};
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn deindex_reverses_index(value in arb_value(), owner in arb_identity()) {
                let indexer = KvPropertyIndexer::new(
                    Arc::new(KvIndices::default()),
                    "people".into(),
                    "name".into(),
                );
                indexer.index(&value, &owner).unwrap();
                prop_assert_eq!(indexer.query(&value).unwrap(), vec![owner.clone()]);
                indexer.deindex(&value, &owner).unwrap();
                prop_assert!(indexer.query(&value).unwrap().is_empty());
            }
        }
    }

    #[test]
    fn association_index_replaces() {
        let indexer = KvAssociationIndexer::new(
            Arc::new(KvIndices::default()),
            "orders".into(),
            "lines".into(),
        );
        let owner = Identity::Int(1);
        indexer
            .index(&owner, &[Identity::Int(2), Identity::Int(3)])
            .unwrap();
        indexer.index(&owner, &[Identity::Int(4)]).unwrap();
        assert_eq!(indexer.query(&owner).unwrap(), vec![Identity::Int(4)]);
    }
}
