//! Memory Database
//!
//! In-process store implementing both [`QueryExecutor`] and
//! [`TransactionCoordinator`]. One transaction is open at a time; other
//! threads read the snapshot taken when it began, so they only ever see
//! committed data.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::QueryFailure;
use crate::persistence::executor::QueryExecutor;
use crate::persistence::tables::{is_write, Tables};
use crate::transaction::{TransactionCoordinator, TransactionScope, TxId};

struct ActiveTransaction {
    id: TxId,
    thread: ThreadId,
    /// Committed state at `begin`; restored on rollback
    snapshot: Tables,
}

struct Inner {
    tables: Tables,
    active: Option<ActiveTransaction>,
}

// == Memory Database ==
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
    released: Condvar,
    last_tx: AtomicU64,
    executions: DashMap<String, u64>,
    failing_queries: Mutex<HashSet<String>>,
    failing_commit: AtomicBool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tables: Tables::default(),
                active: None,
            }),
            released: Condvar::new(),
            last_tx: AtomicU64::new(0),
            executions: DashMap::new(),
            failing_queries: Mutex::new(HashSet::new()),
            failing_commit: AtomicBool::new(false),
        }
    }

    // == Instrumentation ==
    /// How many times `query` was executed, failed attempts included.
    pub fn executions(&self, query: &str) -> u64 {
        self.executions.get(query).map(|count| *count).unwrap_or(0)
    }

    /// Makes the next execution of `query` fail.
    pub fn fail_next(&self, query: &str) {
        lock(&self.failing_queries).insert(query.to_string());
    }

    /// Makes the next commit fail. The transaction stays open until rolled back.
    pub fn fail_next_commit(&self) {
        self.failing_commit.store(true, Ordering::SeqCst);
    }

    fn record(&self, query: &str) -> Result<(), QueryFailure> {
        *self.executions.entry(query.to_string()).or_insert(0) += 1;
        if lock(&self.failing_queries).remove(query) {
            return Err(QueryFailure::failed(query, "injected failure"));
        }
        Ok(())
    }

    /// Waits until no transaction is open. A transaction opened by the calling
    /// thread would never close, so that case is refused instead.
    fn wait_for_gate(&self) -> Result<MutexGuard<'_, Inner>, QueryFailure> {
        let current = thread::current().id();
        let mut inner = lock(&self.inner);
        loop {
            let holder = inner.active.as_ref().map(|active| (active.id, active.thread));
            match holder {
                None => return Ok(inner),
                Some((id, owner)) if owner == current => {
                    return Err(QueryFailure::NestedTransaction(id));
                }
                Some(_) => {
                    inner = self.released.wait(inner).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn finish(&self, inner: &mut Inner, tx: TxId, restore: bool) -> Result<(), QueryFailure> {
        match inner.active.take() {
            Some(active) if active.id == tx => {
                if restore {
                    inner.tables = active.snapshot;
                }
                self.released.notify_all();
                Ok(())
            }
            other => {
                inner.active = other;
                Err(QueryFailure::UnknownTransaction(tx))
            }
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase").finish_non_exhaustive()
    }
}

// == Query Executor ==
impl QueryExecutor for MemoryDatabase {
    fn execute(&self, query: &str, params: &Value) -> Result<Value, QueryFailure> {
        self.record(query)?;

        if is_write(query) {
            // Auto-commit: the write waits for any open transaction
            let mut inner = self.wait_for_gate()?;
            return inner.tables.write(query, params);
        }

        let inner = lock(&self.inner);
        match &inner.active {
            Some(active) if active.thread != thread::current().id() => active.snapshot.read(query, params),
            _ => inner.tables.read(query, params),
        }
    }

    fn execute_in(&self, scope: &TransactionScope, query: &str, params: &Value) -> Result<Value, QueryFailure> {
        self.record(query)?;

        let mut inner = lock(&self.inner);
        match &inner.active {
            Some(active) if active.id == scope.id() => {}
            _ => return Err(QueryFailure::UnknownTransaction(scope.id())),
        }
        if is_write(query) {
            inner.tables.write(query, params)
        } else {
            inner.tables.read(query, params)
        }
    }
}

// == Transaction Coordinator ==
impl TransactionCoordinator for MemoryDatabase {
    fn begin(&self) -> Result<TxId, QueryFailure> {
        let mut inner = self.wait_for_gate()?;
        let id = self.last_tx.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = inner.tables.clone();
        inner.active = Some(ActiveTransaction {
            id,
            thread: thread::current().id(),
            snapshot,
        });
        debug!("Transaction {} begun", id);
        Ok(id)
    }

    fn commit(&self, tx: TxId) -> Result<(), QueryFailure> {
        let mut inner = lock(&self.inner);
        if self.failing_commit.swap(false, Ordering::SeqCst) {
            return Err(QueryFailure::failed("commit", "injected commit failure"));
        }
        self.finish(&mut inner, tx, false)
    }

    fn rollback(&self, tx: TxId) -> Result<(), QueryFailure> {
        let mut inner = lock(&self.inner);
        self.finish(&mut inner, tx, true)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
