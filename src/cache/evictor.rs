//! Eviction policy: decides which entries leave the cache when a budget is hit.
//!
//! The policy is least-recently-used. Every `get` hit and every `put` stamps
//! the entry with a fresh, strictly increasing tick; the entry holding the
//! smallest tick is the next victim. Ticks are indexed in a `BTreeMap`, so
//! touching and evicting are both `O(log n)`.

use std::collections::BTreeMap;

use crate::cache::entry::CacheKey;

/// Recency index over resident keys.
#[derive(Debug, Default)]
pub struct Evictor {
    /// Resident keys ordered by last access (oldest first).
    order: BTreeMap<u64, CacheKey>,

    /// Next tick to hand out.
    next_tick: u64,
}

impl Evictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new access for `key`, replacing its previous stamp if any.
    ///
    /// Returns the new tick, which the caller stores on the entry.
    pub fn touch(&mut self, key: &CacheKey, previous: Option<u64>) -> u64 {
        if let Some(tick) = previous {
            self.order.remove(&tick);
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key.clone());
        tick
    }

    /// Stop tracking the entry stamped with `tick`.
    pub fn forget(&mut self, tick: u64) {
        self.order.remove(&tick);
    }

    /// Remove and return the least recently used key.
    pub fn pop_victim(&mut self) -> Option<CacheKey> {
        self.order.pop_first().map(|(_, key)| key)
    }

    /// Keys in eviction order (next victim first), without removing them.
    pub fn victims(&self, count: usize) -> Vec<CacheKey> {
        self.order.values().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}
