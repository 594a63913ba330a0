//! Session configuration.

use std::time::Duration;

/// Default per-entity pending-queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;

/// Default pessimistic-lock timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a session.
///
/// # Example
///
/// ```
/// use mapstore_core::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new()
///     .with_queue_capacity(100)
///     .with_lock_timeout(Duration::from_secs(5));
/// assert_eq!(config.queue_capacity, 100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum pending operations per entity type per operation kind.
    pub queue_capacity: usize,
    /// Default timeout for pessimistic lock acquisition.
    pub lock_timeout: Duration,
    /// Disable first-level caching and dirty checking for this session.
    pub stateless: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stateless: false,
        }
    }
}

impl SessionConfig {
    /// Creates a config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-entity pending-queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the default lock timeout.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Makes the session stateless.
    #[must_use]
    pub const fn with_stateless(mut self, stateless: bool) -> Self {
        self.stateless = stateless;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.lock_timeout, DEFAULT_LOCK_TIMEOUT);
        assert!(!config.stateless);
    }

    #[test]
    fn builder_chains() {
        let config = SessionConfig::new()
            .with_queue_capacity(10)
            .with_stateless(true);
        assert_eq!(config.queue_capacity, 10);
        assert!(config.stateless);
    }
}
