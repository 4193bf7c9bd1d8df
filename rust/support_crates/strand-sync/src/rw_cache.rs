//! A key-value cache protected by a reader/writer lock.
//!
//! Lookups take the lock in shared mode and may run in parallel with each other;
//! updates take it exclusively and exclude all readers and other writers for
//! their duration. Values are cloned out of the map, so no reference into the
//! protected state ever escapes the lock.
//!
//! The map uses `ahash` for hashing. Iteration and removal are intentionally not
//! offered.

use std::{
    borrow::Borrow,
    hash::Hash,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// A thread-safe map for read-mostly workloads.
///
/// Fairness between readers and writers is that of `std::sync::RwLock` on the
/// host platform; on the supported platforms a waiting writer is not starved
/// indefinitely by a continuous stream of readers.
pub struct ReadWriteCache<K, V> {
    entries: RwLock<ahash::HashMap<K, V>>,
}

impl<K, V> ReadWriteCache<K, V>
where
    K: Eq + Hash,
{
    /// Creates an empty cache.
    pub fn new() -> ReadWriteCache<K, V> {
        ReadWriteCache {
            entries: RwLock::new(ahash::HashMap::default()),
        }
    }

    /// Returns a clone of the value stored for `key`, or `V::default()` if the key
    /// is absent.
    ///
    /// A miss is indistinguishable from a stored default value; use
    /// [`lookup`](Self::lookup) when the difference matters.
    pub fn find<Q>(&self, key: &Q) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone + Default,
    {
        self.lookup(key).unwrap_or_default()
    }

    /// Returns a clone of the value stored for `key`, or `None` if the key is absent.
    pub fn lookup<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.read().get(key).cloned()
    }

    /// Returns `true` if `key` had an entry at the instant of the check.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().contains_key(key)
    }

    /// Inserts `value` for `key`, overwriting any existing entry, and returns the
    /// value that was replaced.
    pub fn update_or_add(&self, key: K, value: V) -> Option<V> {
        self.write().insert(key, value)
    }

    /// Returns the number of entries at the instant of the check.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if the cache had no entries at the instant of the check.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, ahash::HashMap<K, V>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ahash::HashMap<K, V>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> Default for ReadWriteCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        ReadWriteCache::new()
    }
}

impl<K, V> FromIterator<(K, V)> for ReadWriteCache<K, V>
where
    K: Eq + Hash,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        ReadWriteCache {
            entries: RwLock::new(iter.into_iter().collect()),
        }
    }
}
