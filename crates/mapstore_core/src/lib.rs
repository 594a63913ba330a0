//! # Mapstore Core
//!
//! The session and persistence engine of the mapstore object-datastore
//! abstraction layer.
//!
//! A [`Session`] is a unit of work over one backend store: it keeps an
//! identity map of loaded instances, queues writes as bounded pending
//! operations, and executes them at flush in a fixed order. The generic
//! [`NativeEntryPersister`] maps instances to string-keyed native entries
//! through a backend strategy trait, so adapters implement storage concerns
//! only and inherit the whole mapping engine: cascades, embedded
//! flattening, association indexing, identifier strategies and optimistic
//! locking.
//!
//! ## Example
//!
//! ```ignore
//! let datastore = SimpleDatastore::new(context, store);
//! let mut session = datastore.connect();
//! let key = session.persist(&handle)?;
//! session.flush()?;
//! let loaded = session.retrieve("Person", &key)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod connect;
pub mod datastore;
pub mod error;
pub mod pending;
pub mod persister;
pub mod session;
pub mod transaction;

pub use backend::{AssociationIndexer, LockableStore, NativeEntryStore, PropertyValueIndexer};
pub use config::{SessionConfig, DEFAULT_LOCK_TIMEOUT, DEFAULT_QUEUE_CAPACITY};
pub use connect::{
    bind_session, current_session, has_current_session, with_session, SessionBinding,
};
pub use datastore::{Datastore, SimpleDatastore};
pub use error::{CoreResult, DatastoreError};
pub use pending::{
    DrainedOperations, KeyedOp, OperationKind, PendingOperation, PendingQueues, PrimaryAction,
    SessionOp,
};
pub use persister::{NativeEntryPersister, Persister};
pub use session::{Interception, Session, WriteInterceptor};
pub use transaction::{SessionTransaction, TransactionStatus};
