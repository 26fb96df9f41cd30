//! Keyed Mutex Registry
//!
//! Hands out one synchronization token per logical key so that expensive
//! recomputation for the same key runs once at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

// == Mutex Token ==
/// Synchronization handle for one logical key.
///
/// Clones share the same underlying mutex.
#[derive(Debug, Clone, Default)]
pub struct MutexToken {
    inner: Arc<Mutex<()>>,
}

impl MutexToken {
    /// Blocks until the key's mutex is held by the caller.
    ///
    /// A panic in a previous holder does not poison the key: the guard
    /// protects no data, only the critical section.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true when both tokens guard the same key.
    pub fn same_as(&self, other: &MutexToken) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// == Keyed Mutex Registry ==
/// Append-only map from logical key to its [`MutexToken`].
#[derive(Debug, Default)]
pub struct KeyedMutexRegistry {
    tokens: DashMap<String, MutexToken>,
}

impl KeyedMutexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Acquire ==
    /// Returns the token for `key`, creating it on first use.
    ///
    /// Racing first calls for one key resolve to a single token: creation
    /// happens under the key's shard lock, which is released as soon as the
    /// token is cloned out.
    pub fn acquire(&self, key: &str) -> MutexToken {
        if let Some(token) = self.tokens.get(key) {
            return token.clone();
        }
        self.tokens.entry(key.to_string()).or_default().clone()
    }

    /// Number of keys that have a token.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
