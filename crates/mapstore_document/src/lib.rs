//! # Mapstore Document
//!
//! In-memory JSON document backend adapter for the mapstore engine.
//!
//! Entries are stored as `serde_json` documents, one collection per family,
//! with embedded entities as nested objects. The store matches fields
//! natively (`requires_property_indexing()` is false), writes insert
//! batches in one call, and encodes identities and byte strings as tagged
//! single-key objects.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod convert;
pub mod store;

pub use convert::{
    document_to_entry, entry_to_document, id_token, json_to_value, parse_id_token, value_to_json,
};
pub use store::DocumentStore;
