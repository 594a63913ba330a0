//! Per-entry pessimistic locking.

use mapstore_core::{CoreResult, DatastoreError};
use mapstore_model::Identity;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// A table of held entry locks with condvar-based waiting.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashSet<(String, Identity)>>,
    released: Condvar,
}

impl LockTable {
    /// Acquires the lock for the entry, waiting up to `timeout` for a
    /// holder to release it.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::CannotAcquireLock`] if the wait expires.
    pub fn acquire(&self, family: &str, key: &Identity, timeout: Duration) -> CoreResult<()> {
        let entry = (family.to_string(), key.clone());
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();
        while held.contains(&entry) {
            if self.released.wait_until(&mut held, deadline).timed_out() {
                return Err(DatastoreError::cannot_acquire_lock(family, key.clone()));
            }
        }
        held.insert(entry);
        Ok(())
    }

    /// Releases the lock for the entry, waking waiters.
    pub fn release(&self, family: &str, key: &Identity) {
        let entry = (family.to_string(), key.clone());
        let mut held = self.held.lock();
        if held.remove(&entry) {
            self.released.notify_all();
        }
    }

    /// Returns true if the entry is currently locked.
    #[must_use]
    pub fn is_locked(&self, family: &str, key: &Identity) -> bool {
        self.held
            .lock()
            .contains(&(family.to_string(), key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let table = LockTable::default();
        let key = Identity::Int(1);
        table.acquire("people", &key, Duration::from_millis(10)).unwrap();
        assert!(table.is_locked("people", &key));
        table.release("people", &key);
        assert!(!table.is_locked("people", &key));
    }

    #[test]
    fn held_lock_times_out() {
        let table = LockTable::default();
        let key = Identity::Int(1);
        table.acquire("people", &key, Duration::from_millis(10)).unwrap();
        let err = table
            .acquire("people", &key, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, DatastoreError::CannotAcquireLock { .. }));
    }

    #[test]
    fn different_keys_do_not_contend() {
        let table = LockTable::default();
        table
            .acquire("people", &Identity::Int(1), Duration::from_millis(10))
            .unwrap();
        table
            .acquire("people", &Identity::Int(2), Duration::from_millis(10))
            .unwrap();
    }

    #[test]
    fn release_unblocks_waiter() {
        use std::sync::Arc;
        let table = Arc::new(LockTable::default());
        let key = Identity::Int(1);
        table.acquire("people", &key, Duration::from_millis(10)).unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            let key = key.clone();
            std::thread::spawn(move || table.acquire("people", &key, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        table.release("people", &key);
        waiter.join().unwrap().unwrap();
    }
}
