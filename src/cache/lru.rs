//! Bounded least-recently-used cache.
//!
//! Entries live in a slot arena threaded by an intrusive doubly-linked
//! recency list; a hash map points from key to slot. `get`, `put` and
//! `remove` are O(1); `remove_matching` is a linear scan.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Bounded key/value cache evicting the least-recently-used entry.
///
/// Not synchronized: the owner (the scheduler loop) serializes access.
#[derive(Debug)]
pub struct LruCache<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used.
    tail: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Lookup hit and miss counters since construction.
    pub fn hit_stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Look up `key`, marking it most-recently-used on a hit.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.map.get(key).copied() {
            Some(idx) => {
                self.hits += 1;
                self.touch(idx);
                self.slots[idx].as_ref().map(|slot| &slot.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Look up `key` without changing recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.map.get(key)?;
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Insert or refresh `key`.
    ///
    /// Returns the entry evicted to make room, if any. Refreshing an existing
    /// key never evicts.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
            }
            self.touch(idx);
            return None;
        }

        let evicted = if self.map.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let slot = Slot {
            key: key.clone(),
            value,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);

        evicted
    }

    /// Remove `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.map.remove(key)?;
        self.unlink(idx);
        let slot = self.slots[idx].take()?;
        self.free.push(idx);
        Some(slot.value)
    }

    /// Remove every entry whose key satisfies `predicate`. Returns the count removed.
    ///
    /// Keys are collected before any removal, so the predicate always observes
    /// a consistent cache, including right after a `put` that evicted.
    pub fn remove_matching<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let doomed: Vec<K> = self
            .slots
            .iter()
            .flatten()
            .filter(|slot| predicate(&slot.key))
            .map(|slot| slot.key.clone())
            .collect();

        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.map.clear();
        self.slots.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while cursor != NIL {
            match self.slots[cursor].as_ref() {
                Some(slot) => {
                    keys.push(&slot.key);
                    cursor = slot.next;
                }
                None => break,
            }
        }
        keys
    }

    fn pop_lru(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.unlink(idx);
        let slot = self.slots[idx].take()?;
        self.map.remove(&slot.key);
        self.free.push(idx);
        Some((slot.key, slot.value))
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            if let Some(head) = self.slots[old_head].as_mut() {
                head.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };

        if prev != NIL {
            if let Some(p) = self.slots[prev].as_mut() {
                p.next = next;
            }
        } else {
            self.head = next;
        }

        if next != NIL {
            if let Some(n) = self.slots[next].as_mut() {
                n.prev = prev;
            }
        } else {
            self.tail = prev;
        }

        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = NIL;
            slot.next = NIL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    #[test]
    fn test_get_and_put() {
        let mut cache = LruCache::new(4);
        assert!(cache.put("a", 1).is_none());
        assert!(cache.put("b", 2).is_none());

        assert_eq!(cache.get("a"), Some(&1));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hit_stats(), (1, 1));
    }

    #[test]
    fn test_evicts_least_recently_inserted() {
        let mut cache = LruCache::new(3);
        cache.put(1, "one");
        cache.put(2, "two");
        cache.put(3, "three");

        let evicted = cache.put(4, "four");
        assert_eq!(evicted, Some((1, "one")));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get(&4), Some(&"four"));
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let mut cache = LruCache::new(3);
        cache.put(1, ());
        cache.put(2, ());
        cache.put(3, ());

        // Touch the oldest key so 2 becomes the eviction candidate
        assert!(cache.get(&1).is_some());
        let evicted = cache.put(4, ());
        assert_eq!(evicted.map(|(k, _)| k), Some(2));
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn test_put_refreshes_existing_key() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert!(cache.put("a", 10).is_none());

        // "b" is now the least recently used
        let evicted = cache.put("c", 3);
        assert_eq!(evicted, Some(("b", 2)));
        assert_eq!(cache.peek("a"), Some(&10));
    }

    #[test]
    fn test_peek_does_not_touch() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.peek("a"), Some(&1));

        let evicted = cache.put("c", 3);
        assert_eq!(evicted.map(|(k, _)| k), Some("a"));
    }

    #[test]
    fn test_remove_reuses_slots() {
        let mut cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.remove("a"), Some(1));
        assert_eq!(cache.remove("a"), None);

        cache.put("c", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys_by_recency(), vec![&"c", &"b"]);
    }

    #[test]
    fn test_absent_values_are_cached() {
        let mut cache: LruCache<PathBuf, Option<u64>> = LruCache::new(4);
        cache.put(PathBuf::from("/docs/missing"), None);
        assert_eq!(cache.get(Path::new("/docs/missing")), Some(&None));
    }

    #[test]
    fn test_remove_matching_descendants() {
        let mut cache = LruCache::new(8);
        cache.put(PathBuf::from("/docs"), 1);
        cache.put(PathBuf::from("/docs/a"), 2);
        cache.put(PathBuf::from("/docs/a/b"), 3);
        cache.put(PathBuf::from("/music"), 4);

        let removed = cache.remove_matching(|k| k.starts_with("/docs/a"));
        assert_eq!(removed, 2);
        assert!(cache.contains(Path::new("/docs")));
        assert!(cache.contains(Path::new("/music")));
        assert!(!cache.contains(Path::new("/docs/a/b")));

        // Recency list stays consistent after bulk removal
        cache.put(PathBuf::from("/x"), 5);
        assert_eq!(cache.keys_by_recency().len(), 3);
    }

    #[test]
    fn test_remove_matching_after_eviction() {
        let mut cache = LruCache::new(2);
        cache.put(1, ());
        cache.put(2, ());
        let evicted = cache.put(3, ());
        assert!(evicted.is_some());

        assert_eq!(cache.remove_matching(|k| *k >= 2), 2);
        assert!(cache.is_empty());
        cache.put(4, ());
        assert_eq!(cache.keys_by_recency(), vec![&4]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b"));
    }
}
