//! Read-Through Module
//!
//! Cache-aside reads: look the key up, load on miss, publish the loaded
//! value. Every publish is stamped, so an invalidation that lands while a
//! value is being loaded always wins.

use std::any::Any;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CacheStore, CachedValue, KeyedMutexRegistry};
use crate::transaction::{PendingCacheMutation, TransactionScope};

// == Read Through ==
/// Shared handle over the cache and the per-key mutex registry.
#[derive(Debug, Clone)]
pub struct ReadThrough {
    cache: Arc<CacheStore>,
    mutexes: Arc<KeyedMutexRegistry>,
}

impl ReadThrough {
    pub fn new(cache: Arc<CacheStore>, mutexes: Arc<KeyedMutexRegistry>) -> Self {
        Self { cache, mutexes }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn mutexes(&self) -> &Arc<KeyedMutexRegistry> {
        &self.mutexes
    }

    // == Fetch ==
    /// Returns the cached value for `key`, or loads and caches it.
    ///
    /// Load errors are returned unchanged and nothing is cached.
    pub fn fetch<T, E, F>(&self, key: &str, load: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.cache.get::<T>(key) {
            return Ok(value);
        }
        self.load_and_publish(key, load)
    }

    /// Like [`ReadThrough::fetch`], but concurrent misses on `key` run `load`
    /// once. Later callers block on the key's token and read the published
    /// value.
    pub fn fetch_exclusive<T, E, F>(&self, key: &str, load: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.cache.get::<T>(key) {
            return Ok(value);
        }

        let token = self.mutexes.acquire(key);
        let _guard = token.lock();
        if let Some(value) = self.cache.get::<T>(key) {
            debug!("Cache filled while waiting: {}", key);
            return Ok(value);
        }
        self.load_and_publish(key, load)
    }

    /// Reads inside a transaction. The loaded value may include the
    /// transaction's own writes, so it is published only after commit.
    /// `load` receives the scope to run its query in.
    pub fn fetch_in<T, E, F>(&self, scope: &mut TransactionScope, key: &str, load: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce(&TransactionScope) -> Result<T, E>,
    {
        if let Some(value) = self.cache.get::<T>(key) {
            return Ok(value);
        }

        let stamp = self.cache.stamp(key);
        let value = Arc::new(load(scope)?);
        let erased: CachedValue = value.clone();
        scope.defer(
            &self.cache,
            PendingCacheMutation::Put {
                key: key.to_string(),
                value: erased,
                stamp,
            },
        );
        Ok(value)
    }

    // == Fetch Page ==
    /// Sub-keyed fetch: `sub_key` under the family `parent`, loaded under the
    /// parent's token. Removing `parent` drops every page at once.
    pub fn fetch_page<T, E, F>(&self, parent: &str, sub_key: &str, load: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.cache.get_sub::<T>(parent, sub_key) {
            return Ok(value);
        }

        let token = self.mutexes.acquire(parent);
        let _guard = token.lock();
        if let Some(value) = self.cache.get_sub::<T>(parent, sub_key) {
            return Ok(value);
        }

        let stamp = self.cache.stamp(parent);
        let value = Arc::new(load()?);
        self.cache.put_sub_stamped(parent, sub_key, value.clone(), stamp);
        Ok(value)
    }

    // == Fetch Ids ==
    /// Pages whose entries change state after the page is cached. The page
    /// is stored as the ids of its entries and every hit resolves them again
    /// through `resolve`. A missing entry reloads the page.
    ///
    /// A loaded page is cached only when `settled` accepts it.
    pub fn fetch_ids<T, E, L, S, R>(
        &self,
        key: &str,
        id_of: fn(&T) -> i64,
        load: L,
        settled: S,
        resolve: R,
    ) -> Result<Arc<Vec<T>>, E>
    where
        L: FnOnce() -> Result<Vec<T>, E>,
        S: FnOnce(&[T]) -> bool,
        R: Fn(i64) -> Result<Option<T>, E>,
    {
        if let Some(ids) = self.cache.get::<Vec<i64>>(key) {
            let mut entries = Vec::with_capacity(ids.len());
            for id in ids.iter() {
                match resolve(*id)? {
                    Some(entry) => entries.push(entry),
                    None => break,
                }
            }
            if entries.len() == ids.len() {
                return Ok(Arc::new(entries));
            }
            debug!("Page {} refers to a missing entry, reloading", key);
        }

        let stamp = self.cache.stamp(key);
        let entries = load()?;
        if settled(&entries) {
            let ids: Vec<i64> = entries.iter().map(id_of).collect();
            self.cache.put_stamped(key, Arc::new(ids), stamp);
        }
        Ok(Arc::new(entries))
    }

    fn load_and_publish<T, E, F>(&self, key: &str, load: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        let stamp = self.cache.stamp(key);
        let value = Arc::new(load()?);
        self.cache.put_stamped(key, value.clone(), stamp);
        Ok(value)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn read_through() -> ReadThrough {
        ReadThrough::new(Arc::new(CacheStore::new()), Arc::new(KeyedMutexRegistry::new()))
    }

    #[test]
    fn test_fetch_loads_once_then_hits() {
        let reads = read_through();
        let loads = AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(42i64)
        };

        assert_eq!(*reads.fetch("k", load).unwrap(), 42);
        assert_eq!(*reads.fetch("k", load).unwrap(), 42);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fetch_error_is_not_cached() {
        let reads = read_through();

        let err = reads.fetch::<i64, _, _>("k", || Err("db down")).unwrap_err();
        assert_eq!(err, "db down");
        assert!(!reads.cache().contains("k"));
    }

    #[test]
    fn test_fetch_caches_absent_result() {
        let reads = read_through();
        let loads = AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<i64>, ()>(None)
        };

        assert!(reads.fetch("k", load).unwrap().is_none());
        assert!(reads.fetch("k", load).unwrap().is_none());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidation_during_load_wins() {
        let reads = read_through();
        let cache = Arc::clone(reads.cache());

        let value = reads
            .fetch("k", || {
                cache.remove("k");
                Ok::<_, ()>(1i64)
            })
            .unwrap();

        assert_eq!(*value, 1);
        assert!(cache.get::<i64>("k").is_none());
    }

    #[test]
    fn test_fetch_exclusive_prevents_stampede() {
        let reads = Arc::new(read_through());
        let loads = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reads = Arc::clone(&reads);
                let loads = Arc::clone(&loads);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    reads
                        .fetch_exclusive("history", || {
                            loads.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok::<_, ()>(vec![1i64, 2, 3])
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(*handle.join().unwrap(), vec![1, 2, 3]);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fetch_in_publishes_after_commit() {
        let reads = read_through();
        let mut scope = TransactionScope::new(1);

        let value = reads.fetch_in(&mut scope, "k", |_| Ok::<_, ()>(5i64)).unwrap();
        assert_eq!(*value, 5);
        assert!(reads.cache().get::<i64>("k").is_none());

        scope.complete(TransactionStatus::Committed);
        assert_eq!(*reads.cache().get::<i64>("k").unwrap(), 5);
    }

    #[test]
    fn test_fetch_in_discarded_on_rollback() {
        let reads = read_through();
        let mut scope = TransactionScope::new(1);

        reads.fetch_in(&mut scope, "k", |_| Ok::<_, ()>(5i64)).unwrap();
        scope.complete(TransactionStatus::RolledBack);

        assert!(reads.cache().get::<i64>("k").is_none());
    }

    #[test]
    fn test_fetch_ids_resolves_entries_on_hit() {
        let reads = read_through();
        let names = std::sync::Mutex::new(vec!["a".to_string(), "b".to_string()]);
        let resolve = |id: i64| Ok::<_, ()>(names.lock().unwrap().get(id as usize).map(|name| (id, name.clone())));
        let load = || Ok::<_, ()>(vec![(0i64, "a".to_string()), (1, "b".to_string())]);

        reads.fetch_ids("page", |entry: &(i64, String)| entry.0, load, |page| page.len() == 2, resolve).unwrap();
        names.lock().unwrap()[1] = "c".to_string();

        let page = reads
            .fetch_ids("page", |entry: &(i64, String)| entry.0, || Err(()), |_| true, resolve)
            .unwrap();
        assert_eq!(page[1].1, "c");
    }

    #[test]
    fn test_fetch_ids_skips_unsettled_page() {
        let reads = read_through();
        let loads = AtomicUsize::new(0);
        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(vec![7i64])
        };

        reads.fetch_ids("page", |id: &i64| *id, load, |_| false, |id| Ok(Some(id))).unwrap();
        reads.fetch_ids("page", |id: &i64| *id, load, |_| false, |id| Ok(Some(id))).unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert!(!reads.cache().contains("page"));
    }

    #[test]
    fn test_fetch_ids_reloads_when_entry_is_gone() {
        let reads = read_through();
        reads
            .fetch_ids("page", |id: &i64| *id, || Ok::<_, ()>(vec![1i64, 2]), |_| true, |id| Ok(Some(id)))
            .unwrap();

        let page = reads
            .fetch_ids("page", |id: &i64| *id, || Ok::<_, ()>(vec![2i64]), |_| true, |id| Ok((id != 1).then_some(id)))
            .unwrap();
        assert_eq!(*page, vec![2]);
    }

    #[test]
    fn test_fetch_page_shares_parent_invalidation() {
        let reads = read_through();

        reads.fetch_page("pages", "10", || Ok::<_, ()>(vec![1i64])).unwrap();
        reads.fetch_page("pages", "20", || Ok::<_, ()>(vec![1i64, 2])).unwrap();
        assert_eq!(*reads.cache().get_sub::<Vec<i64>>("pages", "20").unwrap(), vec![1, 2]);

        reads.cache().remove("pages");
        assert!(reads.cache().get_sub::<Vec<i64>>("pages", "10").is_none());
        assert!(reads.cache().get_sub::<Vec<i64>>("pages", "20").is_none());
    }
}
