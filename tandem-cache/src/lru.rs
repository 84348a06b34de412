//! A fixed-capacity associative container with two independent limits,
//! entry count and total cost, evicting least-recently-inserted/updated
//! entries until both are satisfied. Built on `IndexMap`'s insertion
//! order doubling as recency order: moving a key to the tail is a
//! `shift_remove` + `insert`, eviction pops index 0. `get` deliberately
//! does *not* touch recency — only `set` does.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::hash::Hash;

struct Slot<V> {
    value: V,
    cost: u64,
}

struct Inner<K, V> {
    map: IndexMap<K, Slot<V>>,
    count_limit: usize,
    cost_limit: u64,
    total_cost: u64,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq,
{
    fn evict(&mut self) {
        loop {
            let over_count = self.count_limit > 0 && self.map.len() > self.count_limit;
            let over_cost = self.cost_limit > 0 && self.total_cost > self.cost_limit;
            if !over_count && !over_cost {
                break;
            }
            match self.map.shift_remove_index(0) {
                Some((_, slot)) => {
                    self.total_cost = self.total_cost.saturating_sub(slot.cost);
                }
                None => break,
            }
        }
    }
}

/// A fixed-capacity, cost-aware LRU map. All operations go through a
/// single mutex guarding the map and its counters. Not re-entrant.
pub struct LruMap<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> LruMap<K, V>
where
    K: Hash + Eq,
{
    pub fn new(count_limit: usize, cost_limit: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: IndexMap::new(),
                count_limit,
                cost_limit,
                total_cost: 0,
            }),
        }
    }

    /// Returns the current value for `key`. Does **not** change
    /// recency — recency only moves on `set`.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.lock().map.get(key).map(|slot| slot.value.clone())
    }

    /// Inserts or updates `key`, moving it to the most-recent end
    /// regardless of whether the value or cost actually changed, then
    /// evicts from the least-recent end until both limits are
    /// satisfied. `cost` is clamped to `>= 0`.
    pub fn set(&self, key: K, value: V, cost: i64) {
        let cost = cost.max(0) as u64;
        let mut inner = self.inner.lock();

        match inner.map.shift_remove(&key) {
            Some(old) => {
                inner.total_cost = inner.total_cost.saturating_sub(old.cost).saturating_add(cost);
            }
            None => {
                inner.total_cost = inner.total_cost.saturating_add(cost);
            }
        }

        inner.map.insert(key, Slot { value, cost });
        inner.evict();
    }

    /// O(1) unlink.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let removed = inner.map.shift_remove(key);
        if let Some(ref slot) = removed {
            inner.total_cost = inner.total_cost.saturating_sub(slot.cost);
        }
        removed.map(|slot| slot.value)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.total_cost = 0;
    }

    pub fn set_count_limit(&self, count_limit: usize) {
        let mut inner = self.inner.lock();
        inner.count_limit = count_limit;
        inner.evict();
    }

    pub fn set_cost_limit(&self, cost_limit: u64) {
        let mut inner = self.inner.lock();
        inner.cost_limit = cost_limit;
        inner.evict();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_cost(&self) -> u64 {
        self.inner.lock().total_cost
    }
}
