//! Transaction Template
//!
//! Runs a unit of work inside one transaction of a [`TransactionCoordinator`]
//! and drains the work's [`TransactionScope`] once the outcome is known.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::QueryFailure;
use crate::transaction::scope::{TransactionScope, TransactionStatus, TxId};

// == Transaction Coordinator ==
/// Begins, commits and rolls back transactions on the durable store.
pub trait TransactionCoordinator: Send + Sync {
    fn begin(&self) -> Result<TxId, QueryFailure>;

    /// Makes the transaction durable. On failure the transaction stays open
    /// and the caller rolls it back.
    fn commit(&self, tx: TxId) -> Result<(), QueryFailure>;

    fn rollback(&self, tx: TxId) -> Result<(), QueryFailure>;
}

// == Transaction Template ==
#[derive(Clone)]
pub struct TransactionTemplate {
    coordinator: Arc<dyn TransactionCoordinator>,
}

impl TransactionTemplate {
    pub fn new(coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        Self { coordinator }
    }

    // == Execute ==
    /// Runs `work` in a new transaction.
    ///
    /// Commits when `work` returns `Ok`. Rolls back when it returns `Err`,
    /// when the commit fails, or when `work` panics. After-commit callbacks
    /// registered on the scope run only after a successful commit.
    pub fn execute<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut TransactionScope) -> Result<T, E>,
        E: From<QueryFailure>,
    {
        let id = self.coordinator.begin()?;
        let mut open = OpenTransaction {
            coordinator: self.coordinator.as_ref(),
            id,
            finished: false,
        };
        let mut scope = TransactionScope::new(id);

        match work(&mut scope) {
            Ok(value) => match open.commit() {
                Ok(()) => {
                    scope.complete(TransactionStatus::Committed);
                    Ok(value)
                }
                Err(failure) => {
                    warn!("Commit of transaction {} failed: {}", id, failure);
                    open.rollback();
                    scope.complete(TransactionStatus::RolledBack);
                    Err(failure.into())
                }
            },
            Err(err) => {
                open.rollback();
                scope.complete(TransactionStatus::RolledBack);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for TransactionTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTemplate").finish_non_exhaustive()
    }
}

/// Rolls the transaction back if it is dropped before finishing.
struct OpenTransaction<'a> {
    coordinator: &'a dyn TransactionCoordinator,
    id: TxId,
    finished: bool,
}

impl OpenTransaction<'_> {
    fn commit(&mut self) -> Result<(), QueryFailure> {
        self.coordinator.commit(self.id)?;
        self.finished = true;
        Ok(())
    }

    fn rollback(&mut self) {
        self.finished = true;
        match self.coordinator.rollback(self.id) {
            Ok(()) => debug!("Transaction {} rolled back", self.id),
            Err(failure) => warn!("Rollback of transaction {} failed: {}", self.id, failure),
        }
    }
}

impl Drop for OpenTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Transaction {} abandoned, rolling back", self.id);
            self.rollback();
        }
    }
}
