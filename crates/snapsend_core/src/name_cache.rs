//! Bounded cache of resolved inode names.

use std::collections::{BTreeMap, HashMap};

/// One resolved name step: the inode's name and the directory holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameCacheEntry {
    /// Directory inode.
    pub parent_ino: u64,
    /// Directory generation.
    pub parent_gen: u64,
    /// Name inside the directory, or an orphan name.
    pub name: Vec<u8>,
    /// Resolution stops here (orphan names live directly under the root).
    pub stop: bool,
    /// Computed before the cursor reached the inode; must be recomputed once
    /// it has.
    pub need_later_update: bool,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameCacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped by eviction.
    pub evictions: u64,
}

#[derive(Debug)]
struct Slot {
    entry: NameCacheEntry,
    stamp: u64,
}

/// Maps `(inode, generation)` to its [`NameCacheEntry`].
///
/// At most one entry exists per pair. Once the cache holds
/// `high_water` entries, insertion evicts the least recently used ones until
/// `low_water` remain.
#[derive(Debug)]
pub struct NameCache {
    slots: HashMap<(u64, u64), Slot>,
    recency: BTreeMap<u64, (u64, u64)>,
    clock: u64,
    low_water: usize,
    high_water: usize,
    stats: NameCacheStats,
}

impl NameCache {
    /// Creates an empty cache with the given eviction marks.
    #[must_use]
    pub fn new(low_water: usize, high_water: usize) -> Self {
        Self {
            slots: HashMap::new(),
            recency: BTreeMap::new(),
            clock: 0,
            low_water,
            high_water,
            stats: NameCacheStats::default(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Looks up an entry and marks it as recently used.
    pub fn get(&mut self, ino: u64, gen: u64) -> Option<NameCacheEntry> {
        let stamp = self.tick();
        let Some(slot) = self.slots.get_mut(&(ino, gen)) else {
            self.stats.misses += 1;
            return None;
        };
        self.recency.remove(&slot.stamp);
        slot.stamp = stamp;
        self.recency.insert(stamp, (ino, gen));
        self.stats.hits += 1;
        Some(slot.entry.clone())
    }

    /// Inserts or replaces the entry for `(ino, gen)`, then evicts if the
    /// cache has reached its high-water mark.
    pub fn insert(&mut self, ino: u64, gen: u64, entry: NameCacheEntry) {
        let stamp = self.tick();
        if let Some(old) = self.slots.insert((ino, gen), Slot { entry, stamp }) {
            self.recency.remove(&old.stamp);
        }
        self.recency.insert(stamp, (ino, gen));
        self.clean_unused();
    }

    /// Drops the entry for `(ino, gen)`.
    pub fn remove(&mut self, ino: u64, gen: u64) -> Option<NameCacheEntry> {
        let slot = self.slots.remove(&(ino, gen))?;
        self.recency.remove(&slot.stamp);
        Some(slot.entry)
    }

    fn clean_unused(&mut self) {
        if self.slots.len() < self.high_water {
            return;
        }
        while self.slots.len() > self.low_water {
            let Some((_, key)) = self.recency.pop_first() else {
                break;
            };
            self.slots.remove(&key);
            self.stats.evictions += 1;
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Hit, miss and eviction counters.
    #[must_use]
    pub fn stats(&self) -> NameCacheStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> NameCacheEntry {
        NameCacheEntry {
            parent_ino: 256,
            parent_gen: 1,
            name: name.as_bytes().to_vec(),
            stop: false,
            need_later_update: false,
        }
    }

    #[test]
    fn generations_are_distinct() {
        let mut cache = NameCache::new(2, 4);
        cache.insert(300, 1, entry("old"));
        cache.insert(300, 2, entry("new"));
        assert_eq!(cache.get(300, 1).unwrap().name, b"old");
        assert_eq!(cache.get(300, 2).unwrap().name, b"new");
        assert!(cache.get(300, 3).is_none());
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn reinsert_replaces() {
        let mut cache = NameCache::new(2, 4);
        cache.insert(300, 1, entry("a"));
        cache.insert(300, 1, entry("b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(300, 1).unwrap().name, b"b");
    }

    #[test]
    fn eviction_trims_to_low_water_oldest_first() {
        let mut cache = NameCache::new(2, 4);
        cache.insert(1, 1, entry("1"));
        cache.insert(2, 1, entry("2"));
        cache.insert(3, 1, entry("3"));
        // refresh 1 so 2 and 3 are the oldest
        assert!(cache.get(1, 1).is_some());
        cache.insert(4, 1, entry("4"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 2);
        assert!(cache.get(1, 1).is_some());
        assert!(cache.get(4, 1).is_some());
        assert!(cache.get(2, 1).is_none());
        assert!(cache.get(3, 1).is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let mut cache = NameCache::new(2, 4);
        cache.insert(5, 1, entry("x"));
        assert!(cache.remove(5, 1).is_some());
        assert!(cache.remove(5, 1).is_none());
        assert!(cache.is_empty());
    }
}
