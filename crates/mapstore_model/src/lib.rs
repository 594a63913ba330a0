//! # Mapstore Model
//!
//! Mapping model for the mapstore object-datastore abstraction layer.
//!
//! This crate provides:
//! - Dynamic property values (`Value`) and opaque entity keys (`Identity`)
//! - The native entry record type backends read and write
//! - Immutable mapped-type descriptors (`PersistentEntity`, properties)
//! - The process-wide `MappingContext` registry
//! - Uniform property access over live instances (`EntityAccess`)

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod context;
pub mod convert;
pub mod entity;
pub mod entry;
pub mod error;
pub mod identity;
pub mod property;
pub mod value;

pub use access::{Accessors, EntityAccess, EntityHandle, EntityRef};
pub use context::MappingContext;
pub use convert::ConversionService;
pub use entity::{EntityBuilder, IdGenerator, IdentityKind, IdentityMapping, PersistentEntity};
pub use entry::{NativeEntry, SharedEntry};
pub use error::{ModelError, ModelResult};
pub use identity::Identity;
pub use property::{
    Cascade, CustomMarshaller, FetchStrategy, PersistentProperty, PropertyKind,
};
pub use value::{AssociationRef, Value, ValueType};
