//! Datastore entry point.

use crate::backend::NativeEntryStore;
use crate::config::SessionConfig;
use crate::session::Session;
use mapstore_model::MappingContext;
use std::sync::Arc;

/// A configured datastore: a mapping context plus a backend adapter, from
/// which sessions are opened.
pub trait Datastore: Send + Sync {
    /// Returns the mapping context.
    fn mapping_context(&self) -> Arc<MappingContext>;

    /// Returns the backend adapter.
    fn store(&self) -> Arc<dyn NativeEntryStore>;

    /// Returns the configuration applied to new sessions.
    fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
    }

    /// Opens a new session.
    fn connect(&self) -> Session {
        Session::new(self.mapping_context(), self.store(), self.session_config())
    }
}

/// A datastore assembled from its parts, sufficient for backends without
/// connection management of their own.
pub struct SimpleDatastore {
    context: Arc<MappingContext>,
    store: Arc<dyn NativeEntryStore>,
    config: SessionConfig,
}

impl SimpleDatastore {
    /// Creates a datastore over the given context and adapter.
    #[must_use]
    pub fn new(context: Arc<MappingContext>, store: Arc<dyn NativeEntryStore>) -> Self {
        Self {
            context,
            store,
            config: SessionConfig::default(),
        }
    }

    /// Overrides the session configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }
}

impl Datastore for SimpleDatastore {
    fn mapping_context(&self) -> Arc<MappingContext> {
        Arc::clone(&self.context)
    }

    fn store(&self) -> Arc<dyn NativeEntryStore> {
        Arc::clone(&self.store)
    }

    fn session_config(&self) -> SessionConfig {
        self.config
    }
}
