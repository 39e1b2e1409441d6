use std::{collections::HashMap, hash::Hash};

use indexmap::IndexMap;

#[cfg(feature = "lru")]
use lru::LruCache;

/// Store for memoized futures.
///
/// All methods are synchronous, the coalescer calls them while holding its
/// state lock and treats the store as the only copy of each future.
pub trait CacheMap<C, F>: Send {
    fn get(&mut self, key: &C) -> Option<F>;
    fn set(&mut self, key: C, value: F);
    fn delete(&mut self, key: &C);
    fn clear(&mut self);
}

/// In-memory store keeping entries in insertion order.
#[derive(Clone, Debug)]
pub struct MemoryCache<C: Hash + Eq, F> {
    entries: IndexMap<C, F>,
}

impl<C: Hash + Eq, F> MemoryCache<C, F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &C> {
        self.entries.keys()
    }
}

impl<C: Hash + Eq, F> Default for MemoryCache<C, F> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<C: Hash + Eq + Send, F: Clone + Send> CacheMap<C, F> for MemoryCache<C, F> {
    fn get(&mut self, key: &C) -> Option<F> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: C, value: F) {
        self.entries.insert(key, value);
    }

    fn delete(&mut self, key: &C) {
        self.entries.shift_remove(key);
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<C: Hash + Eq + Send, F: Clone + Send> CacheMap<C, F> for HashMap<C, F> {
    fn get(&mut self, key: &C) -> Option<F> {
        HashMap::get(self, key).cloned()
    }

    fn set(&mut self, key: C, value: F) {
        self.insert(key, value);
    }

    fn delete(&mut self, key: &C) {
        self.remove(key);
    }

    fn clear(&mut self) {
        HashMap::clear(self);
    }
}

// Bounded store, evicted entries are fetched again on their next load
#[cfg(feature = "lru")]
impl<C: Hash + Eq + Send, F: Clone + Send> CacheMap<C, F> for LruCache<C, F> {
    fn get(&mut self, key: &C) -> Option<F> {
        LruCache::get(self, key).cloned()
    }

    fn set(&mut self, key: C, value: F) {
        self.push(key, value);
    }

    fn delete(&mut self, key: &C) {
        self.pop(key);
    }

    fn clear(&mut self) {
        LruCache::clear(self);
    }
}
