//! Cache Store Module
//!
//! Process-wide cache engine: a sharded map of type-erased values with
//! sub-keyed families and invalidation generations.

use std::any::Any;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::cache::entry::{CacheEntry, CachedValue};
use crate::cache::stats::{CacheStats, StatsCounters};
use crate::cache::DEFAULT_GENERATION_STRIPES;

// == Stamp ==
/// Invalidation generation observed for a key before loading its value.
///
/// A stamped put is dropped when the key was removed after the stamp was
/// taken, so a value read before an invalidation can never land after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    stripe: usize,
    generation: u64,
}

// == Cache Store ==
/// Main cache storage.
///
/// Operations on different keys run on different shards and never wait on
/// each other; operations on the same key are serialized by its shard lock.
pub struct CacheStore {
    /// Top-level key-value storage
    entries: DashMap<String, CacheEntry>,
    /// Sub-keyed values, removed together with their parent key
    families: DashMap<String, HashMap<String, CacheEntry>>,
    /// Striped removal counters backing [`Stamp`]
    generations: Box<[AtomicU64]>,
    /// Hasher used to pick a key's stripe
    hasher: RandomState,
    /// Logical clock for `inserted_at`
    clock: AtomicU64,
    /// Performance statistics
    stats: StatsCounters,
}

impl CacheStore {
    // == Constructor ==
    /// Creates an empty store with the default number of generation stripes.
    pub fn new() -> Self {
        Self::with_stripes(DEFAULT_GENERATION_STRIPES)
    }

    /// Creates an empty store with `stripes` generation counters.
    ///
    /// More stripes means fewer puts skipped because an unrelated key sharing
    /// the stripe was invalidated.
    pub fn with_stripes(stripes: usize) -> Self {
        let generations = (0..stripes.max(1)).map(|_| AtomicU64::new(0)).collect();
        Self {
            entries: DashMap::new(),
            families: DashMap::new(),
            generations,
            hasher: RandomState::new(),
            clock: AtomicU64::new(0),
            stats: StatsCounters::new(),
        }
    }

    // == Get ==
    /// Retrieves the value stored under `key` as `T`.
    ///
    /// Absence is not an error: `None` means "not cached". A value of another
    /// type is reported as a miss.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.entries.get(key).and_then(|entry| entry.downcast::<T>());
        self.record_lookup(value.is_some());
        value
    }

    /// Retrieves the value stored under `sub_key` of the family `key`.
    pub fn get_sub<T: Any + Send + Sync>(&self, key: &str, sub_key: &str) -> Option<Arc<T>> {
        let value = self
            .families
            .get(key)
            .and_then(|family| family.get(sub_key).and_then(|entry| entry.downcast::<T>()));
        self.record_lookup(value.is_some());
        value
    }

    /// Returns true when `key` holds a value or a sub-keyed family.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key) || self.families.contains_key(key)
    }

    // == Put ==
    /// Stores `value` under `key`, replacing any previous value.
    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>) {
        self.put_value(key, value);
    }

    /// Stores an already type-erased value under `key`.
    pub fn put_value(&self, key: &str, value: CachedValue) {
        let entry = CacheEntry::new(value, self.tick());
        self.entries.insert(key.to_string(), entry);
        self.stats.record_put();
    }

    /// Stores `value` under `sub_key` of the family `key`.
    pub fn put_sub<T: Any + Send + Sync>(&self, key: &str, sub_key: &str, value: Arc<T>) {
        let entry = CacheEntry::new(value, self.tick());
        self.families
            .entry(key.to_string())
            .or_default()
            .insert(sub_key.to_string(), entry);
        self.stats.record_put();
    }

    // == Stamped Put ==
    /// Takes the invalidation stamp for `key`. Call before loading its value.
    pub fn stamp(&self, key: &str) -> Stamp {
        let stripe = self.stripe(key);
        Stamp {
            stripe,
            generation: self.generations[stripe].load(Ordering::Acquire),
        }
    }

    /// Stores `value` unless `key` was invalidated since `stamp` was taken.
    ///
    /// Returns false when the put was skipped.
    pub fn put_stamped(&self, key: &str, value: CachedValue, stamp: Stamp) -> bool {
        let entry = CacheEntry::new(value, self.tick());
        // The generation check runs under the key's shard lock, which
        // `remove` also holds while bumping the generation.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !self.is_current(stamp) {
                    return self.skip_stale(key);
                }
                occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                if !self.is_current(stamp) {
                    return self.skip_stale(key);
                }
                vacant.insert(entry);
            }
        }
        self.stats.record_put();
        true
    }

    /// Sub-keyed variant of [`CacheStore::put_stamped`]; `stamp` must come from `key`.
    pub fn put_sub_stamped(&self, key: &str, sub_key: &str, value: CachedValue, stamp: Stamp) -> bool {
        let entry = CacheEntry::new(value, self.tick());
        let family = self.families.entry(key.to_string());
        if !self.is_current(stamp) {
            return self.skip_stale(key);
        }
        family.or_default().insert(sub_key.to_string(), entry);
        self.stats.record_put();
        true
    }

    // == Remove ==
    /// Removes `key` and every sub-key stored under it.
    ///
    /// Returns true if anything was removed. Removing an absent key still
    /// invalidates stamps taken for it.
    pub fn remove(&self, key: &str) -> bool {
        let removed_entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                self.bump(key);
                occupied.remove();
                true
            }
            Entry::Vacant(_vacant) => {
                self.bump(key);
                false
            }
        };
        let removed_family = self.families.remove(key).is_some();

        let removed = removed_entry || removed_family;
        if removed {
            self.stats.record_removal();
            debug!("Cache remove: {}", key);
        }
        removed
    }

    // == Clear ==
    /// Drops every entry and invalidates all outstanding stamps.
    pub fn clear(&self) {
        for generation in self.generations.iter() {
            generation.fetch_add(1, Ordering::AcqRel);
        }
        let dropped = self.len();
        self.entries.clear();
        self.families.clear();
        info!("Cache cleared: dropped {} entries", dropped);
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    // == Length ==
    /// Returns the number of top-level keys (plain entries plus families).
    pub fn len(&self) -> usize {
        self.entries.len() + self.families.len()
    }

    // == Is Empty ==
    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.families.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn stripe(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) % self.generations.len() as u64) as usize
    }

    fn bump(&self, key: &str) {
        self.generations[self.stripe(key)].fetch_add(1, Ordering::AcqRel);
    }

    fn is_current(&self, stamp: Stamp) -> bool {
        self.generations[stamp.stripe].load(Ordering::Acquire) == stamp.generation
    }

    fn skip_stale(&self, key: &str) -> bool {
        self.stats.record_stale_put();
        debug!("Cache put skipped, key invalidated while loading: {}", key);
        false
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("families", &self.families.len())
            .field("stripes", &self.generations.len())
            .finish()
    }
}
