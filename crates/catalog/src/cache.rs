use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use common::RowId;

/// Bounded cache with a fixed TTL and least-recently-used eviction.
/// Entries age out or are evicted; structural mutations clear the
/// cache wholesale.
pub struct TtlLruCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
    clock: u64,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
    last_used: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlLruCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            clock: 0,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.clock += 1;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = self.clock;
        Some(entry.value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.clock += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
                last_used: self.clock,
            },
        );
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }

    pub fn remove(&mut self, key: &K) {
        self.entries.remove(key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Most recently resolved track per directory, shortcutting repeated
/// lookups during a sequential scan.
#[derive(Default)]
pub struct LastTrackCache {
    by_directory: HashMap<String, RowId>,
}

impl LastTrackCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, directory: &str) -> Option<RowId> {
        self.by_directory.get(directory).copied()
    }

    pub fn insert(&mut self, directory: String, track: RowId) {
        self.by_directory.insert(directory, track);
    }

    /// Drops any entry pointing at a deleted track.
    pub fn forget_track(&mut self, track: RowId) {
        self.by_directory.retain(|_, cached| *cached != track);
    }

    pub fn clear(&mut self) {
        self.by_directory.clear();
    }
}
