//! Native entry records.

use crate::value::Value;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The store-side representation of one entity instance: a string-keyed
/// record of dynamic values within a family (collection/table/column family).
///
/// Native entries are the currency in which the generic mapping engine talks
/// to backend adapters. Backends receive whole entries to write and return
/// whole entries on reads; the engine owns key naming and value layout.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeEntry {
    family: String,
    values: BTreeMap<String, Value>,
}

impl NativeEntry {
    /// Creates an empty entry for the given family.
    #[must_use]
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            values: BTreeMap::new(),
        }
    }

    /// Returns the family this entry belongs to.
    #[must_use]
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Reads a value for the given key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Sets a value under the given key, returning any previous value.
    pub fn put(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Removes a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Returns true if the entry has a value for the key.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Stores a nested sub-entry (embedded entity) under the given key.
    pub fn put_entry(&mut self, key: impl Into<String>, entry: NativeEntry) {
        self.values.insert(key.into(), Value::Map(entry.values));
    }

    /// Reads a nested sub-entry stored under the given key.
    ///
    /// The sub-entry is reconstructed with the supplied family name since
    /// embedded entries carry no family of their own.
    #[must_use]
    pub fn get_entry(&self, key: &str, family: &str) -> Option<NativeEntry> {
        match self.values.get(key) {
            Some(Value::Map(map)) => Some(NativeEntry {
                family: family.to_string(),
                values: map.clone(),
            }),
            _ => None,
        }
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the entry holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Returns the underlying value map.
    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Builds an entry from a family and raw value map.
    #[must_use]
    pub fn from_values(family: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Self {
            family: family.into(),
            values,
        }
    }
}

/// A shared, mutable native entry.
///
/// The session's entry cache and pending operations reference the same
/// underlying entry so that cross-entity fixups (inverse association links
/// written into an already-cached entry) are visible when the pending write
/// finally executes.
#[derive(Debug, Clone)]
pub struct SharedEntry(Arc<Mutex<NativeEntry>>);

impl SharedEntry {
    /// Wraps an entry.
    #[must_use]
    pub fn new(entry: NativeEntry) -> Self {
        Self(Arc::new(Mutex::new(entry)))
    }

    /// Locks the entry for reading or mutation.
    pub fn lock(&self) -> MutexGuard<'_, NativeEntry> {
        self.0.lock()
    }

    /// Returns an owned snapshot of the current entry state.
    #[must_use]
    pub fn snapshot(&self) -> NativeEntry {
        self.0.lock().clone()
    }

    /// Returns true if both handles reference the same entry.
    #[must_use]
    pub fn same_entry(&self, other: &SharedEntry) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get() {
        let mut entry = NativeEntry::new("people");
        entry.put("name", Value::Text("Ada".into()));
        assert_eq!(entry.get("name"), Some(&Value::Text("Ada".into())));
        assert_eq!(entry.family(), "people");
        assert_eq!(entry.len(), 1);
    }

    #[test]
    fn nested_entry_roundtrip() {
        let mut address = NativeEntry::new("addresses");
        address.put("city", Value::Text("London".into()));

        let mut person = NativeEntry::new("people");
        person.put_entry("address", address.clone());

        let loaded = person.get_entry("address", "addresses").unwrap();
        assert_eq!(loaded, address);
    }

    #[test]
    fn missing_nested_entry() {
        let entry = NativeEntry::new("people");
        assert!(entry.get_entry("address", "addresses").is_none());
    }

    #[test]
    fn shared_entry_mutation_is_visible() {
        let shared = SharedEntry::new(NativeEntry::new("people"));
        let alias = shared.clone();
        alias.lock().put("age", Value::Int(30));
        assert_eq!(shared.snapshot().get("age"), Some(&Value::Int(30)));
        assert!(shared.same_entry(&alias));
    }
}
