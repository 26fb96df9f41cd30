//! Cache Entry Module
//!
//! Defines the structure for individual cache entries.

use std::any::Any;
use std::sync::Arc;

/// Type-erased cached value.
pub type CachedValue = Arc<dyn Any + Send + Sync>;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
///
/// Entries carry no TTL; they live until removed or the cache is cleared.
#[derive(Clone)]
pub struct CacheEntry {
    /// The stored value
    pub value: CachedValue,
    /// Logical insertion time (store-wide monotonic tick)
    pub inserted_at: u64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry stamped with `inserted_at`.
    pub fn new(value: CachedValue, inserted_at: u64) -> Self {
        Self { value, inserted_at }
    }

    // == Downcast ==
    /// Returns the value as `T`, or `None` when it holds another type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("inserted_at", &self.inserted_at)
            .finish_non_exhaustive()
    }
}
