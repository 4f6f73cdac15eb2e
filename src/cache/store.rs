//! Cost-bounded key-value store.
//!
//! The store keeps two budgets, an entry count and a summed cost. A `put`
//! that would break either budget first evicts least-recently-used entries
//! until the new entry fits. Oversized values are the one exception: a value
//! whose cost alone exceeds `total_cost_limit` evicts everything else and is
//! then kept as the only resident entry until the next insert pushes it out.
//!
//! The store itself is not synchronized. The fetch coordinator owns it behind
//! its own lock.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace};

use crate::cache::entry::{CacheEntry, CacheKey};
use crate::cache::evictor::Evictor;
use crate::config::CacheConfig;

/// Point-in-time statistics for the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of resident entries.
    pub entry_count: usize,
    /// Summed cost of resident entries.
    pub total_cost: u64,
    /// Entry budget.
    pub count_limit: usize,
    /// Cost budget.
    pub total_cost_limit: u64,
    /// Lookups that found a resident entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
}

impl CacheStats {
    /// Usage of the cost budget as a fraction (may exceed 1.0 for an oversized entry).
    pub fn cost_utilization(&self) -> f64 {
        if self.total_cost_limit == 0 {
            return 0.0;
        }
        self.total_cost as f64 / self.total_cost_limit as f64
    }
}

/// In-memory cache bounded by entry count and total cost.
pub struct CostCache<V> {
    /// Resident entries indexed by key.
    entries: HashMap<CacheKey, CacheEntry<V>>,

    /// LRU bookkeeping.
    evictor: Evictor,

    /// Summed cost of `entries`.
    total_cost: u64,

    count_limit: usize,
    total_cost_limit: u64,

    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> CostCache<V> {
    /// Create a cache with the given budgets.
    ///
    /// A `count_limit` of zero is treated as one; the store always admits the
    /// most recent insert.
    pub fn new(count_limit: usize, total_cost_limit: u64) -> Self {
        Self {
            entries: HashMap::new(),
            evictor: Evictor::new(),
            total_cost: 0,
            count_limit: count_limit.max(1),
            total_cost_limit,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.count_limit, config.total_cost_limit)
    }

    /// Look up a resident value, refreshing its recency on a hit.
    pub fn get(&mut self, key: &CacheKey) -> Option<&V> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = self.evictor.touch(key, Some(entry.last_access));
                self.hits += 1;
                Some(&entry.value)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Whether `key` is resident. Does not count as an access.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace the entry for `key`.
    ///
    /// Evicts least-recently-used entries until both budgets admit the new
    /// entry, and returns what was evicted. A replaced entry for the same key
    /// is not reported as evicted.
    pub fn put(&mut self, key: CacheKey, value: V, cost: u64) -> Vec<CacheEntry<V>> {
        self.remove_entry(&key);

        let mut evicted = Vec::new();
        while !self.entries.is_empty()
            && (self.entries.len() + 1 > self.count_limit
                || self.total_cost.saturating_add(cost) > self.total_cost_limit)
        {
            let Some(victim) = self.evictor.pop_victim() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.total_cost -= entry.cost;
                self.evictions += 1;
                debug!(key = %entry.key, cost = entry.cost, "Evicted entry");
                evicted.push(entry);
            }
        }

        if cost > self.total_cost_limit {
            debug!(
                key = %key,
                cost,
                limit = self.total_cost_limit,
                "Entry exceeds cost budget on its own, keeping it as the only resident"
            );
        }

        let tick = self.evictor.touch(&key, None);
        self.total_cost += cost;
        trace!(key = %key, cost, total_cost = self.total_cost, "Inserted entry");
        self.entries
            .insert(key.clone(), CacheEntry::new(key, value, cost, tick));

        evicted
    }

    /// Remove the entry for `key` if present.
    pub fn invalidate(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let removed = self.remove_entry(key);
        if removed.is_some() {
            debug!(key = %key, "Invalidated entry");
        }
        removed
    }

    /// Drop every resident entry. Counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.evictor.clear();
        self.total_cost = 0;
    }

    fn remove_entry(&mut self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.evictor.forget(entry.last_access);
        self.total_cost -= entry.cost;
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub fn count_limit(&self) -> usize {
        self.count_limit
    }

    pub fn total_cost_limit(&self) -> u64 {
        self.total_cost_limit
    }

    /// Keys in the order they would be evicted.
    pub fn eviction_order(&self) -> Vec<CacheKey> {
        self.evictor.victims(self.entries.len())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            total_cost: self.total_cost,
            count_limit: self.count_limit,
            total_cost_limit: self.total_cost_limit,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

impl<V> std::fmt::Debug for CostCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostCache")
            .field("entries", &self.entries.len())
            .field("total_cost", &self.total_cost)
            .field("count_limit", &self.count_limit)
            .field("total_cost_limit", &self.total_cost_limit)
            .finish()
    }
}
