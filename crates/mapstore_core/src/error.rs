//! Error types for the session and persistence engine.

use mapstore_model::{Identity, ModelError};
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, DatastoreError>;

/// Errors raised by sessions, persisters and backend adapters.
#[derive(Debug, Error)]
pub enum DatastoreError {
    /// A mapping-model error (unknown entity, bad property access, failed
    /// conversion).
    #[error(transparent)]
    Model(#[from] ModelError),

    /// The type is registered but cannot be persisted directly (embedded
    /// types), or is not registered at all.
    #[error("not a persistent type: {name}")]
    NotPersistentType {
        /// Offending type name.
        name: String,
    },

    /// No session is bound to the current thread.
    #[error("no session bound to the current thread")]
    ConnectionNotFound,

    /// A pending-operation queue reached its configured capacity.
    #[error("pending {kind} queue for {entity} is full (capacity {capacity})")]
    CapacityExceeded {
        /// Entity whose queue overflowed.
        entity: String,
        /// Operation kind ("insert", "update" or "delete").
        kind: &'static str,
        /// Configured per-entity capacity.
        capacity: usize,
    },

    /// A version-checked update found a newer stored version.
    #[error("optimistic lock failed for {entity}#{key}")]
    OptimisticLockConflict {
        /// Entity name.
        entity: String,
        /// Conflicting key.
        key: Identity,
    },

    /// A pessimistic lock could not be acquired within the timeout.
    #[error("cannot acquire lock on {family}#{key}")]
    CannotAcquireLock {
        /// Store family.
        family: String,
        /// Locked key.
        key: Identity,
    },

    /// A write violated a mapped constraint (required property null).
    #[error("data integrity violation: {message}")]
    DataIntegrityViolation {
        /// Description of the violation.
        message: String,
    },

    /// The session latched a flush error and must be cleared before reuse.
    #[error("session unusable after a flush error; call clear() first")]
    SessionUnusable,

    /// A null value was passed where a persistable instance is required.
    #[error("cannot persist null")]
    CannotPersistNull,

    /// A commit or rollback was requested with no active transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// A write that had to execute immediately was vetoed by an interceptor.
    #[error("operation on {entity} was vetoed")]
    OperationVetoed {
        /// Entity name.
        entity: String,
    },

    /// A backend adapter failure.
    #[error("backend error: {message}")]
    Backend {
        /// Backend-supplied description.
        message: String,
    },
}

impl DatastoreError {
    /// Creates a not-persistent-type error.
    pub fn not_persistent_type(name: impl Into<String>) -> Self {
        Self::NotPersistentType { name: name.into() }
    }

    /// Creates a capacity-exceeded error.
    pub fn capacity_exceeded(
        entity: impl Into<String>,
        kind: &'static str,
        capacity: usize,
    ) -> Self {
        Self::CapacityExceeded {
            entity: entity.into(),
            kind,
            capacity,
        }
    }

    /// Creates an optimistic-lock error.
    pub fn optimistic_lock(entity: impl Into<String>, key: Identity) -> Self {
        Self::OptimisticLockConflict {
            entity: entity.into(),
            key,
        }
    }

    /// Creates a lock-acquisition error.
    pub fn cannot_acquire_lock(family: impl Into<String>, key: Identity) -> Self {
        Self::CannotAcquireLock {
            family: family.into(),
            key,
        }
    }

    /// Creates a data-integrity error.
    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrityViolation {
            message: message.into(),
        }
    }

    /// Creates an operation-vetoed error.
    pub fn vetoed(entity: impl Into<String>) -> Self {
        Self::OperationVetoed {
            entity: entity.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
