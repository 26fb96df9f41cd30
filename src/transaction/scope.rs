//! Transaction Scope
//!
//! The unit-of-work object handed to code running inside a transaction.
//! Holds the callbacks and cache mutations to apply once the transaction
//! completes.

use std::any::Any;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CacheStore, CachedValue, Stamp};

/// Identifier of a transaction on its coordinator.
pub type TxId = u64;

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Committed,
    RolledBack,
}

type AfterCommit = Box<dyn FnOnce() + Send>;
type AfterCompletion = Box<dyn FnOnce(TransactionStatus) + Send>;

// == Pending Cache Mutation ==
/// A cache change queued on a transaction, applied only after commit.
pub enum PendingCacheMutation {
    /// Store a value; skipped if the key is invalidated after `stamp`.
    Put {
        key: String,
        value: CachedValue,
        stamp: Stamp,
    },
    /// Remove a key and its sub-keys.
    Remove { key: String },
}

impl PendingCacheMutation {
    /// Queues a put of `value`, stamped now.
    pub fn put<T: Any + Send + Sync>(cache: &CacheStore, key: impl Into<String>, value: Arc<T>) -> Self {
        let key = key.into();
        let stamp = cache.stamp(&key);
        PendingCacheMutation::Put { key, value, stamp }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        PendingCacheMutation::Remove { key: key.into() }
    }

    fn apply(self, cache: &CacheStore) {
        match self {
            PendingCacheMutation::Put { key, value, stamp } => {
                cache.put_stamped(&key, value, stamp);
            }
            PendingCacheMutation::Remove { key } => {
                cache.remove(&key);
            }
        }
    }
}

impl std::fmt::Debug for PendingCacheMutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingCacheMutation::Put { key, .. } => f.debug_struct("Put").field("key", key).finish(),
            PendingCacheMutation::Remove { key } => f.debug_struct("Remove").field("key", key).finish(),
        }
    }
}

// == Transaction Scope ==
/// Callback queue of one transaction.
///
/// Every scope owns its queue; concurrent transactions never see each
/// other's callbacks.
pub struct TransactionScope {
    id: TxId,
    after_commit: Vec<AfterCommit>,
    after_completion: Vec<AfterCompletion>,
}

impl TransactionScope {
    pub(crate) fn new(id: TxId) -> Self {
        Self {
            id,
            after_commit: Vec::new(),
            after_completion: Vec::new(),
        }
    }

    /// Coordinator id of this transaction.
    pub fn id(&self) -> TxId {
        self.id
    }

    // == Register ==
    /// Runs `callback` once, after the transaction commits. Dropped on rollback.
    pub fn run_after_commit(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.after_commit.push(Box::new(callback));
    }

    /// Runs `callback` once when the transaction ends, whichever way.
    pub fn run_after_completion(&mut self, callback: impl FnOnce(TransactionStatus) + Send + 'static) {
        self.after_completion.push(Box::new(callback));
    }

    /// Applies `mutation` to `cache` after commit.
    pub fn defer(&mut self, cache: &Arc<CacheStore>, mutation: PendingCacheMutation) {
        let cache = Arc::clone(cache);
        self.run_after_commit(move || mutation.apply(&cache));
    }

    /// Shorthand for deferring the removal of each key in `keys`.
    pub fn remove_after_commit(&mut self, cache: &Arc<CacheStore>, keys: impl IntoIterator<Item = String>) {
        for key in keys {
            self.defer(cache, PendingCacheMutation::remove(key));
        }
    }

    /// Number of after-commit callbacks queued so far.
    pub fn pending(&self) -> usize {
        self.after_commit.len()
    }

    // == Complete ==
    /// Drains the queues. After-commit callbacks run in registration order
    /// and only for [`TransactionStatus::Committed`].
    pub(crate) fn complete(self, status: TransactionStatus) {
        let TransactionScope {
            id,
            after_commit,
            after_completion,
        } = self;

        match status {
            TransactionStatus::Committed => {
                debug!("Transaction {} committed, running {} callbacks", id, after_commit.len());
                for callback in after_commit {
                    callback();
                }
            }
            TransactionStatus::RolledBack => {
                debug!("Transaction {} rolled back, discarding {} callbacks", id, after_commit.len());
            }
        }

        for callback in after_completion {
            callback(status);
        }
    }
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("id", &self.id)
            .field("after_commit", &self.after_commit.len())
            .field("after_completion", &self.after_completion.len())
            .finish()
    }
}
