//! # Mapstore KV
//!
//! In-memory key-value backend adapter for the mapstore engine.
//!
//! The store keeps one ordered entry map per family and cannot query entry
//! values, so it reports `requires_property_indexing()` and supplies manual
//! property-value and association indices for the engine to maintain.
//! Identifiers are either random UUIDs handed out ahead of the write or a
//! per-family sequence assigned at write time; entries can be locked
//! pessimistically with a timeout.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod indexing;
pub mod locking;
pub mod store;

pub use indexing::{index_token, KvAssociationIndexer, KvIndices, KvPropertyIndexer};
pub use locking::LockTable;
pub use store::{KeyStrategy, KvStore};
