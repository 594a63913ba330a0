//! Session-scoped transaction model.
//!
//! The reference backends have no multi-statement transaction of their own,
//! so the session itself is the transaction boundary: commit flushes the
//! pending queues, rollback discards them. A [`SessionTransaction`] is a
//! cheap status handle; the state transitions happen through the session.

use parking_lot::Mutex;
use std::sync::Arc;

/// The lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Begun and not yet finished.
    Active,
    /// Finished by commit.
    Committed,
    /// Finished by rollback.
    RolledBack,
}

/// A handle onto one transaction's status. Clones share state.
#[derive(Debug, Clone)]
pub struct SessionTransaction {
    status: Arc<Mutex<TransactionStatus>>,
}

impl SessionTransaction {
    pub(crate) fn begin() -> Self {
        Self {
            status: Arc::new(Mutex::new(TransactionStatus::Active)),
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    /// Returns true while the transaction is neither committed nor rolled
    /// back.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    pub(crate) fn mark(&self, status: TransactionStatus) {
        *self.status.lock() = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_status() {
        let tx = SessionTransaction::begin();
        let other = tx.clone();
        assert!(other.is_active());
        tx.mark(TransactionStatus::Committed);
        assert_eq!(other.status(), TransactionStatus::Committed);
        assert!(!other.is_active());
    }
}
