//! Bounded least-recently-used cache
//!
//! Entries live in a slab and are chained into a recency list by index;
//! an `AHashMap` maps keys to slab slots. `get` moves an entry to the
//! front, `put` past capacity evicts the entry at the back.

use ahash::AHashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Fixed-capacity LRU map
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    index: AHashMap<K, usize>,
    entries: Vec<Entry<K, V>>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache holding at most `capacity` entries (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            index: AHashMap::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true when the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns true if `key` is cached, without touching recency
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Looks up `key` and marks it most recently used
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.touch(slot);
        Some(&self.entries[slot].value)
    }

    /// Inserts or replaces `key`, returning the evicted entry if any
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&slot) = self.index.get(&key) {
            self.entries[slot].value = value;
            self.touch(slot);
            return None;
        }

        if self.entries.len() < self.capacity {
            let slot = self.entries.len();
            self.entries.push(Entry {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            });
            self.index.insert(key, slot);
            self.push_front(slot);
            return None;
        }

        // Full: reuse the least recently used slot.
        let slot = self.tail?;
        self.unlink(slot);
        let old_key = std::mem::replace(&mut self.entries[slot].key, key.clone());
        let old_value = std::mem::replace(&mut self.entries[slot].value, value);
        self.index.remove(&old_key);
        self.index.insert(key, slot);
        self.push_front(slot);
        Some((old_key, old_value))
    }

    fn touch(&mut self, slot: usize) {
        if self.head != Some(slot) {
            self.unlink(slot);
            self.push_front(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.entries[slot].prev, self.entries[slot].next);
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
        self.entries[slot].prev = None;
        self.entries[slot].next = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.entries[slot].prev = None;
        self.entries[slot].next = self.head;
        if let Some(h) = self.head {
            self.entries[h].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        assert!(cache.put("a", 1).is_none());
        assert!(cache.put("b", 2).is_none());
        assert_eq!(cache.get(&"a"), Some(&1));

        let evicted = cache.put("c", 3);
        assert_eq!(evicted, Some(("b", 2)));
        assert!(cache.contains(&"a"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_refreshes_recency() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        assert_eq!(cache.put("c", 3), Some(("b", 2)));
        assert_eq!(cache.get(&"a"), Some(&10));
    }

    #[test]
    fn test_capacity_one() {
        let mut cache = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(1, "x");
        assert_eq!(cache.put(2, "y"), Some((1, "x")));
        assert_eq!(cache.get(&2), Some(&"y"));
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn test_long_sequence_keeps_bound() {
        let mut cache = LruCache::new(3);
        for i in 0..100 {
            cache.put(i, i * 2);
            assert!(cache.len() <= 3);
        }
        assert_eq!(cache.get(&99), Some(&198));
        assert_eq!(cache.get(&98), Some(&196));
        assert_eq!(cache.get(&97), Some(&194));
        assert!(cache.get(&96).is_none());
    }
}
